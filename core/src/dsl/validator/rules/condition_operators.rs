//! Rule: Condition Operators
//!
//! Reports an error for guard conditions that would fail at runtime:
//! unknown `$` operators, per-field conditions that are not operator
//! objects, and `$or`, `$in` or `$nin` given something other than an array.
//!
//! Operands written as a single `${...}` placeholder are accepted as-is,
//! since their shape is only known once the variables resolve.

use serde_json::Value as JsonValue;

use crate::dsl::conditions::Operator;
use crate::dsl::validator::{step_location, Diagnostic, ValidationRule};
use crate::types::WorkflowSpec;

pub struct ConditionOperatorsRule;

impl ValidationRule for ConditionOperatorsRule {
    fn id(&self) -> &'static str {
        "condition-operators"
    }

    fn description(&self) -> &'static str {
        "Condition operators must be known and their operands well-shaped"
    }

    fn validate(&self, workflow: &WorkflowSpec) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for (index, step) in workflow.activities.iter().enumerate() {
            let Some(condition) = &step.condition else {
                continue;
            };
            for (field, operators) in condition {
                let location = format!("{}.condition.{}", step_location(index, step), field);
                self.check_operators(operators, &location, &mut diagnostics);
            }
        }

        diagnostics
    }
}

impl ConditionOperatorsRule {
    /// Also used for `$element.where` criteria in projections
    pub(crate) fn check_operators(
        &self,
        operators: &JsonValue,
        location: &str,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        let Some(map) = operators.as_object() else {
            diagnostics.push(
                Diagnostic::error(
                    self.id(),
                    format!("condition must be an object of operators, got {}", operators),
                )
                .at(location),
            );
            return;
        };

        for (key, operand) in map {
            let Some(op) = Operator::from_key(key) else {
                diagnostics.push(
                    Diagnostic::error(self.id(), format!("unknown condition operator '{}'", key))
                        .at(location),
                );
                continue;
            };

            match op {
                Operator::In | Operator::Nin | Operator::Or => {
                    if !operand.is_array() && !is_placeholder(operand) {
                        diagnostics.push(
                            Diagnostic::error(
                                self.id(),
                                format!("{} expects an array operand, got {}", key, operand),
                            )
                            .at(location),
                        );
                    }
                }
                _ => {}
            }

            if op == Operator::Or {
                if let Some(branches) = operand.as_array() {
                    for (i, branch) in branches.iter().enumerate() {
                        let nested = format!("{}.$or[{}]", location, i);
                        self.check_operators(branch, &nested, diagnostics);
                    }
                }
            }
        }
    }
}

fn is_placeholder(value: &JsonValue) -> bool {
    value
        .as_str()
        .map(str::trim)
        .is_some_and(|s| s.starts_with("${") && s.ends_with('}'))
}
