//! Data fetch providers
//!
//! Steps can hydrate parameters from remote records before their activity
//! runs. A provider is looked up by `type` in a [`FetchProviderRegistry`],
//! built from a factory that receives the run's [`FetchContext`].

pub mod providers;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::vars::{get_path, set_path};
use crate::errors::WorkflowError;
use crate::types::ExecutionContext;

pub use providers::{StoreProvider, DOCUMENT, DOCUMENT_TYPE, INTERACTION_RUN};

/* ===================== Payloads ===================== */

/// Query sent to a provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindPayload {
    #[serde(default)]
    pub query: Map<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<String>,
}

/* ===================== Remote Store ===================== */

/// Remote record service the built-in providers read from
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find(
        &self,
        collection: &str,
        payload: FindPayload,
        context: &ExecutionContext,
    ) -> Result<Vec<JsonValue>>;
}

/// What a provider factory gets to build a provider for one run
#[derive(Clone)]
pub struct FetchContext {
    pub execution: ExecutionContext,
    pub store: Arc<dyn RecordStore>,
}

/* ===================== Providers ===================== */

#[async_trait]
pub trait DataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `do_fetch` already honours `select`
    fn supports_projection(&self) -> bool {
        false
    }

    /// Field the store uses as record identity; `id` filters are renamed to it
    fn primary_key(&self) -> &str {
        "_id"
    }

    async fn do_fetch(&self, payload: FindPayload) -> Result<Vec<JsonValue>>;

    /// Fetch records, applying id rewriting, `limit` and `select`
    async fn fetch(&self, mut payload: FindPayload) -> Result<Vec<JsonValue>, WorkflowError> {
        let primary_key = self.primary_key();
        if primary_key != "id" {
            if let Some(id) = payload.query.remove("id") {
                payload.query.insert(primary_key.to_string(), id);
            }
        }

        let limit = payload.limit;
        let select = payload.select.clone();

        let mut records = self
            .do_fetch(payload)
            .await
            .map_err(|e| WorkflowError::FetchFailed {
                provider: self.name().to_string(),
                message: format!("{:#}", e),
            })?;

        if let Some(limit) = limit {
            records.truncate(limit);
        }

        if !self.supports_projection() {
            if let Some(select) = select {
                let fields = parse_select(&select);
                if !fields.is_empty() {
                    records = records.iter().map(|r| project_record(r, &fields)).collect();
                }
            }
        }

        debug!(provider = self.name(), count = records.len(), "Fetched records");
        Ok(records)
    }
}

/// Split a select string ("name, properties.title status") into field paths
pub fn parse_select(select: &str) -> Vec<String> {
    select
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

/// Keep only the selected fields of a record, preserving nesting
pub fn project_record(record: &JsonValue, fields: &[String]) -> JsonValue {
    if !record.is_object() {
        return record.clone();
    }

    let mut out = JsonValue::Object(Map::new());
    for field in fields {
        if let Some(value) = get_path(record, field) {
            set_path(&mut out, field, value.clone());
        }
    }
    out
}

/* ===================== Registry ===================== */

pub type ProviderFactory = Arc<dyn Fn(&FetchContext) -> Arc<dyn DataProvider> + Send + Sync>;

#[derive(Clone, Default)]
pub struct FetchProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl FetchProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `document`, `document_type` and `interaction_run` providers
    pub fn with_builtin_providers() -> Self {
        let mut registry = Self::new();
        for descriptor in [&DOCUMENT, &DOCUMENT_TYPE, &INTERACTION_RUN] {
            registry.register(descriptor.name, move |ctx: &FetchContext| {
                Arc::new(StoreProvider::new(descriptor, ctx.clone())) as Arc<dyn DataProvider>
            });
        }
        registry
    }

    pub fn register<F>(&mut self, provider_type: impl Into<String>, factory: F)
    where
        F: Fn(&FetchContext) -> Arc<dyn DataProvider> + Send + Sync + 'static,
    {
        self.factories.insert(provider_type.into(), Arc::new(factory));
    }

    pub fn contains(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }

    pub fn provider_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn get(
        &self,
        provider_type: &str,
        context: &FetchContext,
    ) -> Result<Arc<dyn DataProvider>, WorkflowError> {
        self.factories
            .get(provider_type)
            .map(|factory| factory(context))
            .ok_or_else(|| WorkflowError::UnknownProvider {
                provider: provider_type.to_string(),
            })
    }
}

impl std::fmt::Debug for FetchProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchProviderRegistry")
            .field("providers", &self.provider_types())
            .finish()
    }
}
