//! Validation Rules
//!
//! Each file in this module contains one validation rule.
//! Rules are organized by what they check:
//!
//! - `required_fields.rs` - Workflow and step names present
//! - `condition_operators.rs` - Guard operators known and well-shaped
//! - `projection_shape.rs` - Projection nodes hold a single known operator
//! - `fetch_shape.rs` - Fetch declarations name a provider
//! - `reserved_fields.rs` - Fields accepted but not acted upon
//! - `undefined_import.rs` - Imports of variables nothing defines
//! - `result_variable.rs` - Result variable never produced

mod condition_operators;
mod fetch_shape;
mod projection_shape;
mod required_fields;
mod reserved_fields;
mod result_variable;
mod undefined_import;

pub use condition_operators::ConditionOperatorsRule;
pub use fetch_shape::{FetchShapeRule, KnownProvidersRule};
pub use projection_shape::ProjectionShapeRule;
pub use required_fields::RequiredFieldsRule;
pub use reserved_fields::ReservedFieldsRule;
pub use result_variable::ResultVariableRule;
pub use undefined_import::UndefinedImportRule;

use std::collections::BTreeSet;

use crate::dsl::vars::{OBJECT_ID, OBJECT_IDS};
use crate::types::WorkflowSpec;

/// Head segment of a dotted variable path
fn root_name(path: &str) -> &str {
    let path = path.trim();
    path.split('.').next().unwrap_or(path)
}

/// Names visible before the first step runs
fn initial_names(workflow: &WorkflowSpec) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = workflow.vars.keys().cloned().collect();
    names.insert(OBJECT_IDS.to_string());
    names.insert(OBJECT_ID.to_string());
    names
}
