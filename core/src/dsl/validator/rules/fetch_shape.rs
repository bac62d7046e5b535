//! Rule: Fetch Shape
//!
//! Reports an error for fetch declarations without a provider `type` or
//! with a zero `limit`. [`KnownProvidersRule`] is added by the engine,
//! which knows the registered providers, to reject unknown types before
//! the first step runs.

use crate::dsl::validator::{step_location, Diagnostic, ValidationRule};
use crate::types::WorkflowSpec;

pub struct FetchShapeRule;

impl ValidationRule for FetchShapeRule {
    fn id(&self) -> &'static str {
        "fetch-shape"
    }

    fn description(&self) -> &'static str {
        "Fetch declarations must name a provider type"
    }

    fn validate(&self, workflow: &WorkflowSpec) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for (index, step) in workflow.activities.iter().enumerate() {
            for (param, fetch) in &step.fetch {
                let location = format!("{}.fetch.{}", step_location(index, step), param);
                if fetch.provider.trim().is_empty() {
                    diagnostics.push(
                        Diagnostic::error(self.id(), "fetch type is empty").at(&location),
                    );
                }
                if fetch.limit == Some(0) {
                    diagnostics.push(
                        Diagnostic::error(self.id(), "fetch limit must be at least 1")
                            .at(&location),
                    );
                }
            }
        }

        diagnostics
    }
}

/// Rejects fetch types missing from the provider registry
pub struct KnownProvidersRule {
    provider_types: Vec<String>,
}

impl KnownProvidersRule {
    pub fn new<I, S>(provider_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            provider_types: provider_types.into_iter().map(Into::into).collect(),
        }
    }
}

impl ValidationRule for KnownProvidersRule {
    fn id(&self) -> &'static str {
        "known-providers"
    }

    fn description(&self) -> &'static str {
        "Fetch types must be registered providers"
    }

    fn validate(&self, workflow: &WorkflowSpec) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for (index, step) in workflow.activities.iter().enumerate() {
            for (param, fetch) in &step.fetch {
                let provider = fetch.provider.trim();
                if provider.is_empty() || self.provider_types.iter().any(|t| t == provider) {
                    continue;
                }
                diagnostics.push(
                    Diagnostic::error(
                        self.id(),
                        format!(
                            "unknown fetch provider '{}' (known: {})",
                            provider,
                            self.provider_types.join(", ")
                        ),
                    )
                    .at(format!("{}.fetch.{}", step_location(index, step), param)),
                );
            }
        }

        diagnostics
    }
}
