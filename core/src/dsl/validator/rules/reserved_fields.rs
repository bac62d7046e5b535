//! Rule: Reserved Fields
//!
//! Warns about `parallel` and `await` on a step. Both are accepted in the
//! workflow format but steps always run one after another, in declaration
//! order.

use crate::dsl::validator::{step_location, Diagnostic, ValidationRule};
use crate::types::WorkflowSpec;

pub struct ReservedFieldsRule;

impl ValidationRule for ReservedFieldsRule {
    fn id(&self) -> &'static str {
        "reserved-fields"
    }

    fn description(&self) -> &'static str {
        "Warns about fields that are accepted but have no effect"
    }

    fn validate(&self, workflow: &WorkflowSpec) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for (index, step) in workflow.activities.iter().enumerate() {
            if step.parallel.is_some() {
                diagnostics.push(
                    Diagnostic::warning(self.id(), "'parallel' is ignored; steps run sequentially")
                        .at(step_location(index, step)),
                );
            }
            if step.await_step.is_some() {
                diagnostics.push(
                    Diagnostic::warning(self.id(), "'await' is ignored; steps run sequentially")
                        .at(step_location(index, step)),
                );
            }
        }

        diagnostics
    }
}
