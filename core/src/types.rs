use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::errors::WorkflowError;
use crate::options::ActivityOptions;

/// Variable the workflow result is read from when the workflow names none
pub const DEFAULT_RESULT_VAR: &str = "result";

/* ===================== Workflow Definition ===================== */

/// A declarative workflow: an ordered list of activity steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub activities: Vec<ActivitySpec>,

    /// Default variable bindings, overlaid by the payload's vars
    #[serde(default)]
    pub vars: Map<String, JsonValue>,

    /// Name of the variable returned when the run completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    /// Workflow-wide activity option defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ActivityOptions>,
}

impl WorkflowSpec {
    /// Parse a workflow from JSON. Malformed input is a validation failure.
    pub fn from_json(source: &str) -> Result<Self, WorkflowError> {
        serde_json::from_str(source)
            .map_err(|e| WorkflowError::validation(format!("Invalid workflow JSON: {}", e)))
    }

    pub fn result_var(&self) -> &str {
        self.result.as_deref().unwrap_or(DEFAULT_RESULT_VAR)
    }

    /// SHA-256 of the canonical JSON form, hex encoded
    pub fn version_hash(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// One step of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySpec {
    /// Registered activity to run
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub params: Map<String, JsonValue>,

    /// Variable receiving the (projected) result; absent means discard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Guard: variable path -> operator object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Map<String, JsonValue>>,

    #[serde(default, rename = "import", skip_serializing_if = "Option::is_none")]
    pub imports: Option<ImportSpec>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fetch: BTreeMap<String, FetchSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Map<String, JsonValue>>,

    /// Reserved. Steps always run sequentially.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,

    /// Reserved. Steps always run sequentially.
    #[serde(default, rename = "await", skip_serializing_if = "Option::is_none")]
    pub await_step: Option<String>,
}

impl ActivitySpec {
    /// Name used in logs: title when present, else the activity name
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }
}

/// Variables pulled from the store into an activity's input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImportSpec {
    /// Import each name under itself
    Names(Vec<String>),
    /// Import under a parameter name from a variable path
    Mapping(BTreeMap<String, ImportSource>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImportSource {
    Var(String),
    WithDefault {
        var: String,
        #[serde(default)]
        default: Option<JsonValue>,
    },
}

impl ImportSpec {
    /// (parameter name, variable path, default) triples in declaration order
    pub fn entries(&self) -> Vec<(&str, &str, Option<&JsonValue>)> {
        match self {
            ImportSpec::Names(names) => names
                .iter()
                .map(|n| (n.as_str(), n.as_str(), None))
                .collect(),
            ImportSpec::Mapping(map) => map
                .iter()
                .map(|(param, source)| match source {
                    ImportSource::Var(path) => (param.as_str(), path.as_str(), None),
                    ImportSource::WithDefault { var, default } => {
                        (param.as_str(), var.as_str(), default.as_ref())
                    }
                })
                .collect(),
        }
    }
}

/// Data-provider query hydrating one activity parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchSpec {
    #[serde(rename = "type")]
    pub provider: String,

    #[serde(default)]
    pub query: Map<String, JsonValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<String>,

    #[serde(default)]
    pub on_not_found: OnNotFound,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnNotFound {
    #[default]
    Ignore,
    Throw,
}

/* ===================== Execution Payload ===================== */

/// Endpoints of the remote services activities talk to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub studio_url: String,
    #[serde(default)]
    pub store_url: String,
}

/// Input of a workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DslWorkflowPayload {
    pub workflow: WorkflowSpec,

    #[serde(default)]
    pub vars: Map<String, JsonValue>,

    #[serde(default, rename = "objectIds", skip_serializing_if = "Option::is_none")]
    pub object_ids: Option<Vec<String>>,

    pub auth_token: String,

    #[serde(default)]
    pub config: ServiceConfig,

    #[serde(default)]
    pub debug_mode: bool,
}

impl DslWorkflowPayload {
    pub fn new(workflow: WorkflowSpec, auth_token: impl Into<String>) -> Self {
        Self {
            workflow,
            vars: Map::new(),
            object_ids: None,
            auth_token: auth_token.into(),
            config: ServiceConfig::default(),
            debug_mode: false,
        }
    }
}

/// Ambient data handed to every activity and fetch provider of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub run_id: String,
    pub workflow_name: String,
    pub auth_token: String,
    pub config: ServiceConfig,
    pub object_ids: Vec<String>,
    pub debug_mode: bool,
}

/* ===================== Run Outcome ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Executed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub status: StepStatus,
}

/// Result of a completed workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOutcome {
    pub run_id: String,
    pub workflow: String,
    pub version: String,
    pub result: JsonValue,
    pub steps: Vec<StepRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl WorkflowOutcome {
    pub fn executed(&self, name: &str) -> usize {
        self.steps
            .iter()
            .filter(|s| s.name == name && s.status == StepStatus::Executed)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_activity_spec() {
        let spec: WorkflowSpec = serde_json::from_value(json!({
            "name": "summarize",
            "vars": { "lang": "en" },
            "activities": [{
                "name": "generate",
                "title": "Generate summary",
                "params": { "prompt": "${prompt}" },
                "import": ["lang"],
                "condition": { "lang": { "$in": ["en", "fr"] } },
                "fetch": {
                    "doc": { "type": "document", "query": { "id": "${objectId}" }, "limit": 1, "onNotFound": "throw" }
                },
                "output": "summary",
                "await": "other",
                "parallel": true
            }],
            "result": "summary"
        }))
        .unwrap();

        let step = &spec.activities[0];
        assert_eq!(step.label(), "Generate summary");
        assert_eq!(step.await_step.as_deref(), Some("other"));
        assert_eq!(step.fetch["doc"].provider, "document");
        assert_eq!(step.fetch["doc"].on_not_found, OnNotFound::Throw);
        assert_eq!(spec.result_var(), "summary");
        assert!(matches!(step.imports, Some(ImportSpec::Names(_))));
    }

    #[test]
    fn test_import_mapping_with_default() {
        let imports: ImportSpec = serde_json::from_value(json!({
            "language": "lang",
            "tone": { "var": "style.tone", "default": "neutral" }
        }))
        .unwrap();

        let entries = imports.entries();
        assert_eq!(entries[0], ("language", "lang", None));
        assert_eq!(entries[1].0, "tone");
        assert_eq!(entries[1].1, "style.tone");
        assert_eq!(entries[1].2, Some(&json!("neutral")));
    }

    #[test]
    fn test_result_var_defaults() {
        let spec = WorkflowSpec::from_json(r#"{"name": "w", "activities": []}"#).unwrap();
        assert_eq!(spec.result_var(), DEFAULT_RESULT_VAR);
    }

    #[test]
    fn test_malformed_json_is_validation_error() {
        let err = WorkflowSpec::from_json("{ not json").unwrap_err();
        assert_eq!(err.code(), crate::errors::VALIDATION_ERROR);
    }

    #[test]
    fn test_version_hash_is_stable() {
        let a = WorkflowSpec::from_json(r#"{"name": "w", "activities": [], "vars": {"b": 1, "a": 2}}"#)
            .unwrap();
        let b = WorkflowSpec::from_json(r#"{"name": "w", "activities": [], "vars": {"a": 2, "b": 1}}"#)
            .unwrap();
        assert_eq!(a.version_hash(), b.version_hash());
        assert_eq!(a.version_hash().len(), 64);
    }

    #[test]
    fn test_payload_wire_names() {
        let payload: DslWorkflowPayload = serde_json::from_value(json!({
            "workflow": { "name": "w", "activities": [] },
            "objectIds": ["o1"],
            "auth_token": "tok",
            "config": { "studio_url": "https://studio", "store_url": "https://store" },
            "debug_mode": true
        }))
        .unwrap();

        assert_eq!(payload.object_ids, Some(vec!["o1".to_string()]));
        assert_eq!(payload.config.store_url, "https://store");
        assert!(payload.debug_mode);
        assert!(payload.vars.is_empty());
    }
}
