//! Workflow engine
//!
//! Drives a [`DslMachine`] to completion: every pending fetch goes to the
//! provider registry, every pending activity to the [`ActivityExecutor`]
//! with its resolved [`ActivityOptions`]. All I/O, clocks and ids live
//! here, outside the machine.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::dsl::fetch::{FetchContext, FetchProviderRegistry, FindPayload, RecordStore};
use crate::dsl::machine::{ActivityRequest, DslMachine, FetchRequest, PendingCall, Step};
use crate::dsl::validator::rules::KnownProvidersRule;
use crate::dsl::validator::{Diagnostic, Validator};
use crate::dsl::vars::Vars;
use crate::errors::WorkflowError;
use crate::executor::{ActivityCall, ActivityExecutor};
use crate::options::{ActivityOptions, ActivityOptionsRegistry};
use crate::types::{DslWorkflowPayload, ExecutionContext, WorkflowOutcome, WorkflowSpec};

pub struct Engine {
    executor: Arc<dyn ActivityExecutor>,
    providers: FetchProviderRegistry,
    store: Arc<dyn RecordStore>,
    options: ActivityOptionsRegistry,
    default_options: ActivityOptions,
    validator: Validator,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn providers(&self) -> &FetchProviderRegistry {
        &self.providers
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Check a workflow against every rule, including registered provider types
    pub fn validate(&self, workflow: &WorkflowSpec) -> Result<Vec<Diagnostic>, WorkflowError> {
        self.validator.check(workflow)
    }

    /// Options an activity runs with: engine defaults, then the workflow's
    /// own `options`, then any per-activity override
    pub fn resolve_options(&self, activity: &str, workflow: Option<&WorkflowSpec>) -> ActivityOptions {
        let defaults = self.workflow_defaults(workflow);
        self.options.get_or_default(activity, &defaults)
    }

    fn workflow_defaults(&self, workflow: Option<&WorkflowSpec>) -> ActivityOptions {
        match workflow.and_then(|w| w.options.as_ref()) {
            Some(options) => self.default_options.merged_with(options),
            None => self.default_options.clone(),
        }
    }

    /// Validate and run a workflow to completion
    pub async fn run(&self, payload: DslWorkflowPayload) -> Result<WorkflowOutcome, WorkflowError> {
        let DslWorkflowPayload {
            workflow,
            vars,
            object_ids,
            auth_token,
            config,
            debug_mode,
        } = payload;

        let run_id = Uuid::new_v4().to_string();
        let version = workflow.version_hash();
        let span = info_span!(
            "dsl_workflow",
            workflow = %workflow.name,
            run_id = %run_id,
            version = %short_hash(&version)
        );

        async move {
            for warning in self.validate(&workflow)? {
                warn!(%warning, "Workflow validation warning");
            }

            let object_ids = object_ids.unwrap_or_default();
            let context = ExecutionContext {
                run_id: run_id.clone(),
                workflow_name: workflow.name.clone(),
                auth_token,
                config,
                object_ids,
                debug_mode,
            };
            let vars = Vars::for_run(&workflow.vars, &vars, &context.object_ids);
            let workflow_name = workflow.name.clone();
            let mut machine = DslMachine::new(workflow, vars);

            let started_at = Utc::now();
            info!(steps = machine.workflow().activities.len(), "Workflow started");
            let result = self.drive(&mut machine, &context).await?;
            let finished_at = Utc::now();
            info!("Workflow completed");

            Ok::<_, WorkflowError>(WorkflowOutcome {
                run_id,
                workflow: workflow_name,
                version,
                result,
                steps: machine.steps().to_vec(),
                started_at,
                finished_at,
            })
        }
        .instrument(span)
        .await
    }

    /// Step a machine until it returns, performing each pending call.
    /// A machine restored from storage continues from its saved position.
    pub async fn drive(
        &self,
        machine: &mut DslMachine,
        context: &ExecutionContext,
    ) -> Result<JsonValue, WorkflowError> {
        let defaults = self.workflow_defaults(Some(machine.workflow()));
        let fetch_context = FetchContext {
            execution: context.clone(),
            store: self.store.clone(),
        };

        loop {
            match machine.run_until_suspended()? {
                Step::Done => break,
                Step::Continue | Step::Suspended => {}
            }

            let value = match machine.pending().cloned() {
                Some(PendingCall::Fetch(request)) => self.fetch(request, &fetch_context).await?,
                Some(PendingCall::Activity(request)) => {
                    self.execute(request, context, &defaults).await?
                }
                None => {
                    return Err(WorkflowError::invalid_state(
                        "machine suspended without a pending call",
                    ))
                }
            };
            machine.resume(value)?;
        }

        Ok(machine.result().cloned().unwrap_or(JsonValue::Null))
    }

    async fn fetch(
        &self,
        request: FetchRequest,
        context: &FetchContext,
    ) -> Result<JsonValue, WorkflowError> {
        let provider = self.providers.get(&request.provider, context)?;
        debug!(
            step = %request.step,
            param = %request.param,
            provider = %request.provider,
            "Fetching parameter"
        );
        let records = provider.fetch(request.payload).await?;
        Ok(JsonValue::Array(records))
    }

    async fn execute(
        &self,
        request: ActivityRequest,
        context: &ExecutionContext,
        defaults: &ActivityOptions,
    ) -> Result<JsonValue, WorkflowError> {
        let options = self.options.get_or_default(&request.activity, defaults);
        let span = info_span!("step", activity = %request.activity, index = request.step_index);

        async move {
            if context.debug_mode {
                info!(params = %JsonValue::Object(request.params.clone()), "Executing activity");
            } else {
                debug!("Executing activity");
            }

            let call = ActivityCall {
                activity: request.activity,
                params: request.params,
                context: context.clone(),
            };
            match self.executor.execute(call, &options).await {
                Ok(result) => Ok(result),
                Err(e) => {
                    warn!(code = e.code(), error = %e, "Activity failed");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("providers", &self.providers)
            .field("options", &self.options)
            .field("default_options", &self.default_options)
            .finish()
    }
}

/// Run a workflow and return its result variable
pub async fn dsl_workflow(
    engine: &Engine,
    payload: DslWorkflowPayload,
) -> Result<JsonValue, WorkflowError> {
    engine.run(payload).await.map(|outcome| outcome.result)
}

fn short_hash(version: &str) -> &str {
    version.get(..12).unwrap_or(version)
}

/* ===================== Builder ===================== */

#[derive(Default)]
pub struct EngineBuilder {
    executor: Option<Arc<dyn ActivityExecutor>>,
    providers: Option<FetchProviderRegistry>,
    store: Option<Arc<dyn RecordStore>>,
    options: ActivityOptionsRegistry,
    default_options: ActivityOptions,
}

impl EngineBuilder {
    pub fn executor(mut self, executor: Arc<dyn ActivityExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Replaces the built-in providers
    pub fn providers(mut self, providers: FetchProviderRegistry) -> Self {
        self.providers = Some(providers);
        self
    }

    /// Store backing the built-in providers
    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn options(mut self, options: ActivityOptionsRegistry) -> Self {
        self.options = options;
        self
    }

    pub fn default_options(mut self, options: ActivityOptions) -> Self {
        self.default_options = options;
        self
    }

    /// Take activity defaults and overrides from loaded configuration
    pub fn config(self, config: &Config) -> Self {
        self.options(config.activities.registry())
            .default_options(config.activities.defaults.clone())
    }

    pub fn build(self) -> anyhow::Result<Engine> {
        let executor = self
            .executor
            .ok_or_else(|| anyhow!("An activity executor is required"))?;
        let providers = self
            .providers
            .unwrap_or_else(FetchProviderRegistry::with_builtin_providers);
        let validator = Validator::new().with_rule(KnownProvidersRule::new(providers.provider_types()));

        Ok(Engine {
            executor,
            providers,
            store: self.store.unwrap_or_else(|| Arc::new(UnconfiguredStore)),
            options: self.options,
            default_options: self.default_options,
            validator,
        })
    }
}

/// Stand-in used when no store was given; every read fails
struct UnconfiguredStore;

#[async_trait]
impl RecordStore for UnconfiguredStore {
    async fn find(
        &self,
        collection: &str,
        _payload: FindPayload,
        _context: &ExecutionContext,
    ) -> anyhow::Result<Vec<JsonValue>> {
        Err(anyhow!("no record store configured (reading '{}')", collection))
    }
}
