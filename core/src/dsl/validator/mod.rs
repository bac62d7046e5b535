//! Workflow validation
//!
//! Runs before a workflow starts and catches malformed specs that would
//! otherwise fail halfway through a run: unknown condition operators,
//! ambiguous projections, fetches without a provider type, and so on.
//!
//! # Architecture
//!
//! 1. **ValidationRule trait** - Each rule implements this trait
//! 2. **Validator** - Collects and runs all rules
//! 3. **Diagnostic** - The output of validation (errors and warnings)
//!
//! Only error-level diagnostics stop a workflow from starting. Warnings
//! are logged by the engine and printed by `refrain validate`.

pub mod rules;

use crate::errors::WorkflowError;
use crate::types::{ActivitySpec, WorkflowSpec};

// ============================================================================
// Diagnostics
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    /// Where in the workflow, e.g. `activities[1](generate).condition.lang`
    pub location: Option<String>,
    pub message: String,
    pub severity: Severity,
    /// Which rule produced this diagnostic
    pub rule_id: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Must be fixed - the workflow cannot run
    Error,
    /// Should probably be fixed - potential bug
    Warning,
}

impl Diagnostic {
    pub fn error(rule_id: &'static str, message: impl Into<String>) -> Self {
        Self {
            location: None,
            message: message.into(),
            severity: Severity::Error,
            rule_id,
        }
    }

    pub fn warning(rule_id: &'static str, message: impl Into<String>) -> Self {
        Self {
            location: None,
            message: message.into(),
            severity: Severity::Warning,
            rule_id,
        }
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error)
    }

    pub fn is_warning(&self) -> bool {
        matches!(self.severity, Severity::Warning)
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.location {
            Some(location) => write!(
                f,
                "{} at {}: {} [{}]",
                severity, location, self.message, self.rule_id
            ),
            None => write!(f, "{}: {} [{}]", severity, self.message, self.rule_id),
        }
    }
}

/// Location prefix of a step
pub fn step_location(index: usize, step: &ActivitySpec) -> String {
    format!("activities[{}]({})", index, step.name)
}

// ============================================================================
// ValidationRule Trait
// ============================================================================

/// Each rule checks one aspect of a workflow and should not depend on
/// the results of other rules.
pub trait ValidationRule: Send + Sync {
    /// Unique identifier for this rule (e.g., "condition-operators")
    fn id(&self) -> &'static str;

    /// Human-readable description of what this rule checks
    fn description(&self) -> &'static str;

    fn validate(&self, workflow: &WorkflowSpec) -> Vec<Diagnostic>;
}

// ============================================================================
// Validator
// ============================================================================

pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    /// Validator with all built-in rules
    pub fn new() -> Self {
        Self {
            rules: vec![
                // Error rules - the workflow cannot run
                Box::new(rules::RequiredFieldsRule),
                Box::new(rules::ConditionOperatorsRule),
                Box::new(rules::ProjectionShapeRule),
                Box::new(rules::FetchShapeRule),
                // Warning rules - likely mistakes
                Box::new(rules::ReservedFieldsRule),
                Box::new(rules::UndefinedImportRule),
                Box::new(rules::ResultVariableRule),
            ],
        }
    }

    pub fn with_rule(mut self, rule: impl ValidationRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn validate(&self, workflow: &WorkflowSpec) -> Vec<Diagnostic> {
        self.rules
            .iter()
            .flat_map(|rule| rule.validate(workflow))
            .collect()
    }

    /// Run all rules; fail if any error-level diagnostic was produced,
    /// otherwise return the warnings
    pub fn check(&self, workflow: &WorkflowSpec) -> Result<Vec<Diagnostic>, WorkflowError> {
        let (errors, others): (Vec<_>, Vec<_>) = self
            .validate(workflow)
            .into_iter()
            .partition(Diagnostic::is_error);

        if errors.is_empty() {
            Ok(others)
        } else {
            Err(WorkflowError::Validation {
                diagnostics: errors,
            })
        }
    }

    /// Registered rules as (id, description), useful for documentation
    pub fn rules(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.rules.iter().map(|r| (r.id(), r.description()))
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate with the built-in rules
pub fn validate_workflow(workflow: &WorkflowSpec) -> Result<Vec<Diagnostic>, WorkflowError> {
    Validator::new().check(workflow)
}
