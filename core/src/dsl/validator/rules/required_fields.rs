//! Rule: Required Fields
//!
//! Reports an error when the workflow or one of its steps has an empty
//! name. Step names select the activity to run, so a blank one can never
//! be dispatched.

use crate::dsl::validator::{step_location, Diagnostic, ValidationRule};
use crate::types::WorkflowSpec;

pub struct RequiredFieldsRule;

impl ValidationRule for RequiredFieldsRule {
    fn id(&self) -> &'static str {
        "required-fields"
    }

    fn description(&self) -> &'static str {
        "Workflow and activity names must be non-empty"
    }

    fn validate(&self, workflow: &WorkflowSpec) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        if workflow.name.trim().is_empty() {
            diagnostics.push(Diagnostic::error(self.id(), "workflow name is empty").at("name"));
        }

        for (index, step) in workflow.activities.iter().enumerate() {
            if step.name.trim().is_empty() {
                diagnostics.push(
                    Diagnostic::error(self.id(), "activity name is empty")
                        .at(step_location(index, step)),
                );
            }
            if let Some(output) = &step.output {
                if output.trim().is_empty() {
                    diagnostics.push(
                        Diagnostic::error(self.id(), "output must name a variable")
                            .at(format!("{}.output", step_location(index, step))),
                    );
                }
            }
        }

        diagnostics
    }
}
