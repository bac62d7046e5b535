//! Error taxonomy for workflow execution
//!
//! Every failure that can abort a workflow run is a [`WorkflowError`]. Each
//! variant carries a stable code (see the constants below) so hosts can
//! report failures through their own channels without matching on messages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::time::Duration;
use thiserror::Error;

use crate::dsl::validator::Diagnostic;

/* ===================== Error Codes ===================== */

pub const PARAM_NOT_FOUND: &str = "PARAM_NOT_FOUND";
pub const UNKNOWN_CONDITION: &str = "UNKNOWN_CONDITION";
pub const INVALID_CONDITION: &str = "INVALID_CONDITION";
pub const UNKNOWN_PROJECTION: &str = "UNKNOWN_PROJECTION";
pub const INVALID_PROJECTION: &str = "INVALID_PROJECTION";
pub const UNKNOWN_PROVIDER: &str = "UNKNOWN_PROVIDER";
pub const UNKNOWN_ACTIVITY: &str = "UNKNOWN_ACTIVITY";
pub const ACTIVITY_FAILED: &str = "ACTIVITY_FAILED";
pub const ACTIVITY_TIMEOUT: &str = "ACTIVITY_TIMEOUT";
pub const FETCH_FAILED: &str = "FETCH_FAILED";
pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
pub const INVALID_STATE: &str = "INVALID_STATE";

/* ===================== WorkflowError ===================== */

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Parameter '{param}' not found for activity '{activity}'")]
    ParamNotFound { activity: String, param: String },

    #[error("Unknown condition operator '{operator}'")]
    UnknownCondition { operator: String },

    #[error("Invalid condition: {message}")]
    InvalidCondition { message: String },

    #[error("Unknown projection operator '{operator}'")]
    UnknownProjection { operator: String },

    #[error("Invalid projection: {message}")]
    InvalidProjection { message: String },

    #[error("No fetch provider registered for type '{provider}'")]
    UnknownProvider { provider: String },

    #[error("No activity registered with name '{activity}'")]
    UnknownActivity { activity: String },

    #[error("Activity '{activity}' failed ({error_type}): {message}")]
    ActivityFailed {
        activity: String,
        error_type: String,
        message: String,
        non_retryable: bool,
    },

    #[error("Activity '{activity}' timed out after {timeout:?}")]
    Timeout { activity: String, timeout: Duration },

    #[error("Fetch from provider '{provider}' failed: {message}")]
    FetchFailed { provider: String, message: String },

    #[error("Workflow validation failed: {}", summarize(.diagnostics))]
    Validation { diagnostics: Vec<Diagnostic> },

    #[error("Invalid interpreter state: {message}")]
    InvalidState { message: String },
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl WorkflowError {
    /// Single-message validation failure, used for parse errors.
    pub fn validation(message: impl Into<String>) -> Self {
        WorkflowError::Validation {
            diagnostics: vec![Diagnostic::error("parse", message)],
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        WorkflowError::InvalidState {
            message: message.into(),
        }
    }

    /// Stable error code for this failure
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::ParamNotFound { .. } => PARAM_NOT_FOUND,
            WorkflowError::UnknownCondition { .. } => UNKNOWN_CONDITION,
            WorkflowError::InvalidCondition { .. } => INVALID_CONDITION,
            WorkflowError::UnknownProjection { .. } => UNKNOWN_PROJECTION,
            WorkflowError::InvalidProjection { .. } => INVALID_PROJECTION,
            WorkflowError::UnknownProvider { .. } => UNKNOWN_PROVIDER,
            WorkflowError::UnknownActivity { .. } => UNKNOWN_ACTIVITY,
            WorkflowError::ActivityFailed { .. } => ACTIVITY_FAILED,
            WorkflowError::Timeout { .. } => ACTIVITY_TIMEOUT,
            WorkflowError::FetchFailed { .. } => FETCH_FAILED,
            WorkflowError::Validation { .. } => VALIDATION_ERROR,
            WorkflowError::InvalidState { .. } => INVALID_STATE,
        }
    }

    /// Whether the durable runtime may retry the failed unit of work.
    ///
    /// Configuration and lookup errors are deterministic, so retrying them
    /// can never succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkflowError::ActivityFailed { non_retryable, .. } => !non_retryable,
            WorkflowError::Timeout { .. } | WorkflowError::FetchFailed { .. } => true,
            _ => false,
        }
    }

    /// Structured metadata attached to failure reports
    pub fn metadata(&self) -> Map<String, JsonValue> {
        let mut meta = Map::new();
        match self {
            WorkflowError::ParamNotFound { activity, param } => {
                meta.insert("activity".into(), activity.clone().into());
                meta.insert("param".into(), param.clone().into());
            }
            WorkflowError::UnknownCondition { operator }
            | WorkflowError::UnknownProjection { operator } => {
                meta.insert("operator".into(), operator.clone().into());
            }
            WorkflowError::UnknownProvider { provider }
            | WorkflowError::FetchFailed { provider, .. } => {
                meta.insert("provider".into(), provider.clone().into());
            }
            WorkflowError::UnknownActivity { activity } => {
                meta.insert("activity".into(), activity.clone().into());
            }
            WorkflowError::ActivityFailed {
                activity,
                error_type,
                ..
            } => {
                meta.insert("activity".into(), activity.clone().into());
                meta.insert("errorType".into(), error_type.clone().into());
            }
            WorkflowError::Timeout { activity, timeout } => {
                meta.insert("activity".into(), activity.clone().into());
                meta.insert("timeoutMs".into(), (timeout.as_millis() as u64).into());
            }
            WorkflowError::Validation { diagnostics } => {
                let rules: Vec<JsonValue> = diagnostics
                    .iter()
                    .map(|d| JsonValue::String(d.rule_id.to_string()))
                    .collect();
                meta.insert("rules".into(), JsonValue::Array(rules));
            }
            WorkflowError::InvalidCondition { .. }
            | WorkflowError::InvalidProjection { .. }
            | WorkflowError::InvalidState { .. } => {}
        }
        meta
    }

    /// Serializable report for the runtime's failure channel
    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code().to_string(),
            message: self.to_string(),
            retryable: self.is_retryable(),
            metadata: self.metadata(),
        }
    }
}

/* ===================== ErrorInfo ===================== */

/// Wire form of a workflow failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, JsonValue>,
}
