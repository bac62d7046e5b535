//! Test helpers for interpreter scenarios

use async_trait::async_trait;
use serde_json::{json, Map, Value as JsonValue};
use std::sync::{Arc, Mutex};

use crate::dsl::fetch::providers::tests::FakeStore;
use crate::engine::{Engine, EngineBuilder};
use crate::errors::WorkflowError;
use crate::executor::{
    handler_fn, ActivityCall, ActivityError, ActivityExecutor, ActivityRegistry, LocalExecutor,
};
use crate::options::ActivityOptions;
use crate::types::{DslWorkflowPayload, WorkflowSpec};

/// Executor recording every call and the options it ran with
pub struct CountingExecutor {
    inner: LocalExecutor,
    pub calls: Mutex<Vec<(String, Map<String, JsonValue>, ActivityOptions)>>,
}

impl CountingExecutor {
    pub fn new(registry: ActivityRegistry) -> Self {
        Self {
            inner: LocalExecutor::new(registry),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn count(&self, activity: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _, _)| name == activity)
            .count()
    }

    pub fn params(&self, index: usize) -> JsonValue {
        JsonValue::Object(self.calls.lock().unwrap()[index].1.clone())
    }

    pub fn options(&self, index: usize) -> ActivityOptions {
        self.calls.lock().unwrap()[index].2.clone()
    }
}

#[async_trait]
impl ActivityExecutor for CountingExecutor {
    async fn execute(
        &self,
        call: ActivityCall,
        options: &ActivityOptions,
    ) -> Result<JsonValue, WorkflowError> {
        self.calls
            .lock()
            .unwrap()
            .push((call.activity.clone(), call.params.clone(), options.clone()));
        self.inner.execute(call, options).await
    }
}

/// Activities used by the scenarios:
/// - `hello` returns "Hello"
/// - `world` appends ", World!" to its `hello` param
/// - `translate` uppercases `text`
/// - `summarize` returns the length of `doc.text`
/// - `explode` always fails with `Boom`
pub fn activities() -> ActivityRegistry {
    ActivityRegistry::new()
        .with("hello", handler_fn(|_call: ActivityCall| async move { Ok(json!("Hello")) }))
        .with(
            "world",
            handler_fn(|call: ActivityCall| async move {
                let hello: String = call.param_as("hello")?;
                Ok::<_, ActivityError>(json!(format!("{}, World!", hello)))
            }),
        )
        .with(
            "translate",
            handler_fn(|call: ActivityCall| async move {
                let text: String = call.param_as("text")?;
                Ok::<_, ActivityError>(json!(text.to_uppercase()))
            }),
        )
        .with(
            "summarize",
            handler_fn(|call: ActivityCall| async move {
                let doc = call.param("doc")?;
                let len = doc.get("text").and_then(JsonValue::as_str).map_or(0, str::len);
                Ok::<_, ActivityError>(json!({ "length": len, "token": call.context.auth_token }))
            }),
        )
        .with(
            "explode",
            handler_fn(|_call: ActivityCall| async move {
                Err(ActivityError::new("Boom", "activity exploded"))
            }),
        )
}

pub fn executor() -> Arc<CountingExecutor> {
    Arc::new(CountingExecutor::new(activities()))
}

pub fn builder(executor: &Arc<CountingExecutor>) -> EngineBuilder {
    Engine::builder().executor(executor.clone())
}

pub fn engine(executor: &Arc<CountingExecutor>) -> Engine {
    builder(executor).build().unwrap()
}

pub fn engine_with_store(executor: &Arc<CountingExecutor>, store: Arc<FakeStore>) -> Engine {
    builder(executor).store(store).build().unwrap()
}

pub fn payload(workflow: JsonValue, vars: JsonValue) -> DslWorkflowPayload {
    let workflow: WorkflowSpec = serde_json::from_value(workflow).unwrap();
    let mut payload = DslWorkflowPayload::new(workflow, "token-123");
    payload.vars = vars.as_object().cloned().unwrap_or_default();
    payload
}

/// The two-step greeting workflow, with a first step guarded on `lang`
pub fn hello_world() -> JsonValue {
    json!({
        "name": "hello_world",
        "activities": [
            {
                "name": "translate",
                "condition": { "lang": { "$exists": true } },
                "params": { "text": "${lang}" },
                "output": "lang"
            },
            { "name": "hello", "output": "hello" },
            {
                "name": "world",
                "condition": { "hello": { "$null": false } },
                "import": ["hello"],
                "output": "result"
            }
        ]
    })
}
