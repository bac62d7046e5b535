//! Rule: Result Variable
//!
//! Warns when the variable returned by the workflow (`result`, defaulting
//! to "result") is neither declared in `vars` nor written by any step. The
//! run would then return `null`.

use super::{initial_names, root_name};
use crate::dsl::validator::{Diagnostic, ValidationRule};
use crate::types::WorkflowSpec;

pub struct ResultVariableRule;

impl ValidationRule for ResultVariableRule {
    fn id(&self) -> &'static str {
        "result-variable"
    }

    fn description(&self) -> &'static str {
        "The result variable should be produced by the workflow"
    }

    fn validate(&self, workflow: &WorkflowSpec) -> Vec<Diagnostic> {
        let result = root_name(workflow.result_var());
        let produced = initial_names(workflow).contains(result)
            || workflow
                .activities
                .iter()
                .filter_map(|step| step.output.as_deref())
                .any(|output| root_name(output) == result);

        if produced {
            Vec::new()
        } else {
            vec![Diagnostic::warning(
                self.id(),
                format!("result variable '{}' is never set; the workflow returns null", result),
            )
            .at("result")]
        }
    }
}
