//! Activity execution boundary
//!
//! The engine submits each step as an [`ActivityCall`] to an
//! [`ActivityExecutor`]. A durable scheduler can sit behind that trait; the
//! in-process [`LocalExecutor`] dispatches to handlers registered by name.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::WorkflowError;
use crate::options::ActivityOptions;
use crate::types::ExecutionContext;

/* ===================== Calls ===================== */

/// One unit of work: the activity name, its merged input and the run context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityCall {
    pub activity: String,
    pub params: Map<String, JsonValue>,
    pub context: ExecutionContext,
}

impl ActivityCall {
    /// Required parameter
    pub fn param(&self, name: &str) -> Result<&JsonValue, WorkflowError> {
        self.params
            .get(name)
            .filter(|v| !v.is_null())
            .ok_or_else(|| WorkflowError::ParamNotFound {
                activity: self.activity.clone(),
                param: name.to_string(),
            })
    }

    /// Required parameter deserialized into `T`
    pub fn param_as<T: DeserializeOwned>(&self, name: &str) -> Result<T, WorkflowError> {
        let value = self.param(name)?;
        serde_json::from_value(value.clone()).map_err(|e| WorkflowError::ActivityFailed {
            activity: self.activity.clone(),
            error_type: "InvalidParam".to_string(),
            message: format!("parameter '{}': {}", name, e),
            non_retryable: true,
        })
    }

    pub fn optional_param(&self, name: &str) -> Option<&JsonValue> {
        self.params.get(name).filter(|v| !v.is_null())
    }
}

/// Failure reported by an activity handler
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error_type}: {message}")]
pub struct ActivityError {
    pub error_type: String,
    pub message: String,
    /// Set by the handler to stop retries regardless of policy
    pub non_retryable: bool,
}

impl ActivityError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            non_retryable: false,
        }
    }

    pub fn non_retryable(mut self) -> Self {
        self.non_retryable = true;
        self
    }
}

impl From<WorkflowError> for ActivityError {
    fn from(err: WorkflowError) -> Self {
        let retryable = err.is_retryable();
        Self {
            error_type: err.code().to_string(),
            message: err.to_string(),
            non_retryable: !retryable,
        }
    }
}

impl From<anyhow::Error> for ActivityError {
    fn from(err: anyhow::Error) -> Self {
        Self::new("Error", format!("{:#}", err))
    }
}

/* ===================== Executor ===================== */

/// Scheduler boundary: run one activity with its resolved options
#[async_trait]
pub trait ActivityExecutor: Send + Sync {
    async fn execute(
        &self,
        call: ActivityCall,
        options: &ActivityOptions,
    ) -> Result<JsonValue, WorkflowError>;
}

#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn run(&self, call: ActivityCall) -> Result<JsonValue, ActivityError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ActivityHandler for FnHandler<F>
where
    F: Fn(ActivityCall) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JsonValue, ActivityError>> + Send,
{
    async fn run(&self, call: ActivityCall) -> Result<JsonValue, ActivityError> {
        (self.0)(call).await
    }
}

/// Wrap an async function as a handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ActivityHandler>
where
    F: Fn(ActivityCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JsonValue, ActivityError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Activity name -> handler
#[derive(Clone, Default)]
pub struct ActivityRegistry {
    handlers: HashMap<String, Arc<dyn ActivityHandler>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, activity: impl Into<String>, handler: Arc<dyn ActivityHandler>) {
        self.handlers.insert(activity.into(), handler);
    }

    pub fn with(mut self, activity: impl Into<String>, handler: Arc<dyn ActivityHandler>) -> Self {
        self.register(activity, handler);
        self
    }

    pub fn contains(&self, activity: &str) -> bool {
        self.handlers.contains_key(activity)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn get(&self, activity: &str) -> Result<Arc<dyn ActivityHandler>, WorkflowError> {
        self.handlers
            .get(activity)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownActivity {
                activity: activity.to_string(),
            })
    }
}

impl std::fmt::Debug for ActivityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityRegistry")
            .field("activities", &self.names())
            .finish()
    }
}

/// In-process executor. Enforces `startToCloseTimeout`; retries are left
/// to whatever scheduler wraps the engine.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor {
    registry: ActivityRegistry,
}

impl LocalExecutor {
    pub fn new(registry: ActivityRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ActivityRegistry {
        &self.registry
    }
}

#[async_trait]
impl ActivityExecutor for LocalExecutor {
    async fn execute(
        &self,
        call: ActivityCall,
        options: &ActivityOptions,
    ) -> Result<JsonValue, WorkflowError> {
        let handler = self.registry.get(&call.activity)?;
        let activity = call.activity.clone();

        let outcome = match options.start_to_close_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, handler.run(call)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(activity = %activity, ?timeout, "Activity timed out");
                    return Err(WorkflowError::Timeout { activity, timeout });
                }
            },
            None => handler.run(call).await,
        };

        outcome.map_err(|e| {
            let non_retryable = e.non_retryable || options.is_non_retryable(&e.error_type);
            debug!(activity = %activity, error_type = %e.error_type, non_retryable, "Activity failed");
            WorkflowError::ActivityFailed {
                activity,
                error_type: e.error_type,
                message: e.message,
                non_retryable,
            }
        })
    }
}
