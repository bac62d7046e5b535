//! Rule: Undefined Import
//!
//! Warns when a step imports a variable that neither the workflow `vars`
//! nor an earlier step's `output` defines. Payload variables are only
//! known at run time, so this is a warning rather than an error. Imports
//! with a default value are never reported.

use std::collections::BTreeSet;

use super::{initial_names, root_name};
use crate::dsl::validator::{step_location, Diagnostic, ValidationRule};
use crate::types::WorkflowSpec;

pub struct UndefinedImportRule;

impl ValidationRule for UndefinedImportRule {
    fn id(&self) -> &'static str {
        "undefined-import"
    }

    fn description(&self) -> &'static str {
        "Imported variables should be defined by vars or an earlier output"
    }

    fn validate(&self, workflow: &WorkflowSpec) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let mut defined: BTreeSet<String> = initial_names(workflow);

        for (index, step) in workflow.activities.iter().enumerate() {
            if let Some(imports) = &step.imports {
                for (param, path, default) in imports.entries() {
                    if default.is_some() || defined.contains(root_name(path)) {
                        continue;
                    }
                    diagnostics.push(
                        Diagnostic::warning(
                            self.id(),
                            format!("'{}' is not defined before this step", path),
                        )
                        .at(format!("{}.import.{}", step_location(index, step), param)),
                    );
                }
            }

            if let Some(output) = &step.output {
                defined.insert(root_name(output).to_string());
            }
        }

        diagnostics
    }
}
