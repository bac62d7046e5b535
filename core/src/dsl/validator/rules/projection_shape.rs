//! Rule: Projection Shape
//!
//! Reports an error for projection nodes that cannot be evaluated. A node
//! holding any `$`-prefixed key must hold exactly one key, and that key
//! must be a known projection operator. `$element` additionally needs an
//! object operand with a `from` source and well-formed `where` criteria.
//!
//! # Valid
//!
//! ```json
//! { "summary": { "$eval": "#.text" }, "fixed": { "a": 1 } }
//! ```
//!
//! # Invalid
//!
//! ```json
//! { "summary": { "$eval": "#.text", "other": 1 } }
//! { "total": { "$sum": [1, 2] } }
//! ```

use serde_json::Value as JsonValue;

use super::ConditionOperatorsRule;
use crate::dsl::projection::ProjectionOp;
use crate::dsl::validator::{step_location, Diagnostic, ValidationRule};
use crate::types::WorkflowSpec;

pub struct ProjectionShapeRule;

impl ValidationRule for ProjectionShapeRule {
    fn id(&self) -> &'static str {
        "projection-shape"
    }

    fn description(&self) -> &'static str {
        "Projection nodes must hold a single known operator"
    }

    fn validate(&self, workflow: &WorkflowSpec) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for (index, step) in workflow.activities.iter().enumerate() {
            let Some(projection) = &step.projection else {
                continue;
            };
            for (field, node) in projection {
                let location = format!("{}.projection.{}", step_location(index, step), field);
                self.check_node(node, &location, &mut diagnostics);
            }
        }

        diagnostics
    }
}

impl ProjectionShapeRule {
    fn check_node(&self, node: &JsonValue, location: &str, diagnostics: &mut Vec<Diagnostic>) {
        let Some(map) = node.as_object() else {
            return;
        };
        if !map.keys().any(|k| k.starts_with('$')) {
            return;
        }
        if map.len() > 1 {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            diagnostics.push(
                Diagnostic::error(
                    self.id(),
                    format!("expected a single operator, found keys [{}]", keys.join(", ")),
                )
                .at(location),
            );
            return;
        }

        let Some((key, operand)) = map.iter().next() else {
            return;
        };
        match ProjectionOp::from_key(key) {
            None => diagnostics.push(
                Diagnostic::error(self.id(), format!("unknown projection operator '{}'", key))
                    .at(location),
            ),
            Some(ProjectionOp::Element) => self.check_element(operand, location, diagnostics),
            Some(ProjectionOp::Eval) => {}
        }
    }

    fn check_element(&self, operand: &JsonValue, location: &str, diagnostics: &mut Vec<Diagnostic>) {
        let Some(args) = operand.as_object() else {
            diagnostics.push(
                Diagnostic::error(self.id(), format!("$element expects an object, got {}", operand))
                    .at(location),
            );
            return;
        };

        match args.get("from") {
            Some(JsonValue::Array(_)) | Some(JsonValue::String(_)) => {}
            _ => diagnostics.push(
                Diagnostic::error(self.id(), "$element needs an array or path in 'from'")
                    .at(location),
            ),
        }

        match args.get("where") {
            None | Some(JsonValue::Null) => {}
            Some(JsonValue::Object(criteria)) => {
                // Literal criteria are `$eq` shorthand
                for (key, condition) in criteria.iter().filter(|(_, c)| c.is_object()) {
                    let nested = format!("{}.$element.where.{}", location, key);
                    ConditionOperatorsRule.check_operators(condition, &nested, diagnostics);
                }
            }
            Some(other) => diagnostics.push(
                Diagnostic::error(
                    self.id(),
                    format!("$element.where must be an object, got {}", other),
                )
                .at(location),
            ),
        }
    }
}
