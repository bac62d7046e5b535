//! Declarative workflow interpreter
//!
//! - `vars` - per-run variable store and `${...}` templates
//! - `conditions` - step guards
//! - `projection` - result reshaping
//! - `fetch` - parameter hydration from data providers
//! - `validator` - checks run before a workflow starts
//! - `machine` - the serializable step machine

pub mod conditions;
pub mod fetch;
pub mod machine;
pub mod projection;
pub mod validator;
pub mod vars;

#[cfg(test)]
mod tests;
