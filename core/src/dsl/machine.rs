//! Step machine for the DSL interpreter
//!
//! The machine walks `activities` one step at a time. Every external
//! effect (fetching records, running an activity) is handed out as a
//! [`PendingCall`] and the machine suspends until the driver feeds the
//! outcome back through [`DslMachine::resume`].
//!
//! The machine never reads the clock, draws random values or performs I/O,
//! so its whole state serializes between any two steps. Restoring a saved
//! machine and resuming it with the same values reproduces the same run.
//!
//! ## Phases of a step
//! 1. `Guard` - evaluate the condition, collect imports
//! 2. `Fetch { idx }` - hydrate one declared fetch parameter per suspension
//! 3. `Execute` - merge templated params, submit the activity
//! 4. `Store { result }` - project the result and write `output`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use super::fetch::FindPayload;
use super::projection::make_projection;
use super::vars::Vars;
use crate::errors::WorkflowError;
use crate::types::{ActivitySpec, OnNotFound, StepRecord, StepStatus, WorkflowSpec};

/* ===================== Control Flow ===================== */

/// Position inside the current step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum StepPhase {
    Guard,
    Fetch { idx: usize },
    Execute,
    Store { result: JsonValue },
}

/// External work the machine is waiting on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum PendingCall {
    /// Resume with the array of records returned by the provider
    Fetch(FetchRequest),
    /// Resume with the activity result
    Activity(ActivityRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub step: String,
    pub param: String,
    pub provider: String,
    pub payload: FindPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRequest {
    pub step_index: usize,
    pub activity: String,
    pub params: Map<String, JsonValue>,
}

/// Control flow state
///
/// When `Suspend`, the machine stops stepping until resumed.
/// `Return` carries the workflow result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Control {
    None,
    Suspend(PendingCall),
    Return(JsonValue),
}

/// Result of executing one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Continue to next step
    Continue,
    /// Waiting for `resume`
    Suspended,
    /// Execution complete
    Done,
}

/* ===================== Machine ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DslMachine {
    workflow: WorkflowSpec,
    vars: Vars,
    /// Index of the current activity
    pc: usize,
    phase: StepPhase,
    /// Input being assembled for the current activity
    params: Map<String, JsonValue>,
    steps: Vec<StepRecord>,
    control: Control,
}

impl DslMachine {
    pub fn new(workflow: WorkflowSpec, vars: Vars) -> Self {
        Self {
            workflow,
            vars,
            pc: 0,
            phase: StepPhase::Guard,
            params: Map::new(),
            steps: Vec::new(),
            control: Control::None,
        }
    }

    pub fn workflow(&self) -> &WorkflowSpec {
        &self.workflow
    }

    pub fn vars(&self) -> &Vars {
        &self.vars
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn phase(&self) -> &StepPhase {
        &self.phase
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn control(&self) -> &Control {
        &self.control
    }

    pub fn current_activity(&self) -> Option<&ActivitySpec> {
        self.workflow.activities.get(self.pc)
    }

    pub fn pending(&self) -> Option<&PendingCall> {
        match &self.control {
            Control::Suspend(call) => Some(call),
            _ => None,
        }
    }

    /// Workflow result once the machine is done
    pub fn result(&self) -> Option<&JsonValue> {
        match &self.control {
            Control::Return(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.control, Control::Return(_))
    }

    /// Step until the machine suspends or completes
    pub fn run_until_suspended(&mut self) -> Result<Step, WorkflowError> {
        loop {
            match self.step()? {
                Step::Continue => continue,
                other => return Ok(other),
            }
        }
    }

    /// Execute one micro-step
    pub fn step(&mut self) -> Result<Step, WorkflowError> {
        match self.control {
            Control::None => {}
            Control::Suspend(_) => return Ok(Step::Suspended),
            Control::Return(_) => return Ok(Step::Done),
        }

        let Some(activity) = self.current_activity().cloned() else {
            let result = self
                .vars
                .get(self.workflow.result_var())
                .cloned()
                .unwrap_or(JsonValue::Null);
            self.control = Control::Return(result);
            return Ok(Step::Done);
        };

        match self.phase.clone() {
            StepPhase::Guard => self.guard(&activity),
            StepPhase::Fetch { idx } => Ok(self.fetch(&activity, idx)),
            StepPhase::Execute => Ok(self.execute(&activity)),
            StepPhase::Store { result } => self.store(&activity, result),
        }
    }

    /// Feed the outcome of the pending call back into the machine. On error
    /// the call stays pending and the machine is unchanged.
    pub fn resume(&mut self, value: JsonValue) -> Result<(), WorkflowError> {
        let pending = match &self.control {
            Control::Suspend(call) => call.clone(),
            _ => {
                return Err(WorkflowError::invalid_state(
                    "resume called on a machine that is not suspended",
                ))
            }
        };

        match pending {
            PendingCall::Fetch(request) => self.accept_records(request, value)?,
            PendingCall::Activity(_) => self.phase = StepPhase::Store { result: value },
        }
        self.control = Control::None;
        Ok(())
    }

    /* ===================== Phases ===================== */

    fn guard(&mut self, activity: &ActivitySpec) -> Result<Step, WorkflowError> {
        if let Some(condition) = &activity.condition {
            if !self.vars.matches(condition)? {
                debug!(step = %activity.name, "Condition not met, skipping step");
                self.finish_step(activity, StepStatus::Skipped);
                return Ok(Step::Continue);
            }
        }

        self.params = match &activity.imports {
            Some(imports) => self.vars.import_vars(imports),
            None => Map::new(),
        };
        self.phase = StepPhase::Fetch { idx: 0 };
        Ok(Step::Continue)
    }

    fn fetch(&mut self, activity: &ActivitySpec, idx: usize) -> Step {
        let Some((param, spec)) = activity.fetch.iter().nth(idx) else {
            self.phase = StepPhase::Execute;
            return Step::Continue;
        };

        let payload = FindPayload {
            query: self.vars.resolve_map(&spec.query),
            limit: spec.limit,
            select: spec.select.clone(),
        };
        self.control = Control::Suspend(PendingCall::Fetch(FetchRequest {
            step: activity.name.clone(),
            param: param.clone(),
            provider: spec.provider.clone(),
            payload,
        }));
        Step::Suspended
    }

    fn accept_records(&mut self, request: FetchRequest, value: JsonValue) -> Result<(), WorkflowError> {
        let StepPhase::Fetch { idx } = self.phase else {
            return Err(WorkflowError::invalid_state("fetch resumed outside of a fetch phase"));
        };
        let Some((activity, spec)) = self
            .current_activity()
            .and_then(|a| a.fetch.get(&request.param).map(|spec| (a.name.clone(), spec.clone())))
        else {
            return Err(WorkflowError::invalid_state(format!(
                "no fetch declared for parameter '{}'",
                request.param
            )));
        };

        let records = match value {
            JsonValue::Array(records) => records,
            other => {
                return Err(WorkflowError::invalid_state(format!(
                    "fetch '{}' resumed with a non-array value {}",
                    request.param, other
                )))
            }
        };

        if records.is_empty() && spec.on_not_found == OnNotFound::Throw {
            return Err(WorkflowError::ParamNotFound {
                activity,
                param: request.param,
            });
        }

        let hydrated = if spec.limit == Some(1) {
            records.into_iter().next().unwrap_or(JsonValue::Null)
        } else {
            JsonValue::Array(records)
        };
        self.params.insert(request.param, hydrated);
        self.phase = StepPhase::Fetch { idx: idx + 1 };
        Ok(())
    }

    fn execute(&mut self, activity: &ActivitySpec) -> Step {
        for (key, value) in self.vars.resolve_map(&activity.params) {
            self.params.insert(key, value);
        }

        self.control = Control::Suspend(PendingCall::Activity(ActivityRequest {
            step_index: self.pc,
            activity: activity.name.clone(),
            params: self.params.clone(),
        }));
        Step::Suspended
    }

    fn store(&mut self, activity: &ActivitySpec, result: JsonValue) -> Result<Step, WorkflowError> {
        if let Some(output) = &activity.output {
            let value = match &activity.projection {
                Some(projection) => {
                    JsonValue::Object(make_projection(projection, &self.params, &result)?)
                }
                None => result,
            };
            self.vars.set(output, value);
        }

        self.finish_step(activity, StepStatus::Executed);
        Ok(Step::Continue)
    }

    fn finish_step(&mut self, activity: &ActivitySpec, status: StepStatus) {
        self.steps.push(StepRecord {
            name: activity.name.clone(),
            output: activity.output.clone(),
            status,
        });
        self.pc += 1;
        self.phase = StepPhase::Guard;
        self.params.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn machine(workflow: JsonValue, vars: JsonValue) -> DslMachine {
        let workflow: WorkflowSpec = serde_json::from_value(workflow).unwrap();
        let vars = Vars::for_run(&workflow.vars, vars.as_object().unwrap(), &[]);
        DslMachine::new(workflow, vars)
    }

    #[test]
    fn test_empty_workflow_returns_null() {
        let mut m = machine(json!({ "name": "wf", "activities": [] }), json!({}));
        assert_eq!(m.run_until_suspended().unwrap(), Step::Done);
        assert_eq!(m.result(), Some(&JsonValue::Null));
    }

    #[test]
    fn test_activity_params_are_templated_over_imports() {
        let mut m = machine(
            json!({
                "name": "wf",
                "vars": { "lang": "en", "topic": "rust" },
                "activities": [{
                    "name": "generate",
                    "import": ["lang", "topic"],
                    "params": { "topic": "about ${topic}", "n": 2 },
                    "output": "result"
                }]
            }),
            json!({}),
        );

        assert_eq!(m.run_until_suspended().unwrap(), Step::Suspended);
        let Some(PendingCall::Activity(request)) = m.pending() else {
            panic!("expected an activity call");
        };
        assert_eq!(request.activity, "generate");
        assert_eq!(
            JsonValue::Object(request.params.clone()),
            json!({ "lang": "en", "topic": "about rust", "n": 2 })
        );

        m.resume(json!("done")).unwrap();
        assert_eq!(m.run_until_suspended().unwrap(), Step::Done);
        assert_eq!(m.result(), Some(&json!("done")));
        assert_eq!(m.steps()[0].status, StepStatus::Executed);
    }

    #[test]
    fn test_fetch_suspends_per_parameter_in_key_order() {
        let mut m = machine(
            json!({
                "name": "wf",
                "activities": [{
                    "name": "summarize",
                    "fetch": {
                        "types": { "type": "document_type", "query": { "status": "${status}" } },
                        "doc": { "type": "document", "query": { "id": "${docId}" }, "limit": 1 }
                    },
                    "output": "result"
                }]
            }),
            json!({ "status": "active", "docId": "d1" }),
        );

        m.run_until_suspended().unwrap();
        let Some(PendingCall::Fetch(first)) = m.pending().cloned() else {
            panic!("expected a fetch");
        };
        assert_eq!(first.param, "doc");
        assert_eq!(first.payload.query.get("id"), Some(&json!("d1")));
        m.resume(json!([{ "_id": "d1" }, { "_id": "d2" }])).unwrap();

        m.run_until_suspended().unwrap();
        let Some(PendingCall::Fetch(second)) = m.pending().cloned() else {
            panic!("expected a fetch");
        };
        assert_eq!(second.param, "types");
        assert_eq!(second.provider, "document_type");
        m.resume(json!([])).unwrap();

        m.run_until_suspended().unwrap();
        let Some(PendingCall::Activity(request)) = m.pending() else {
            panic!("expected an activity call");
        };
        assert_eq!(
            JsonValue::Object(request.params.clone()),
            json!({ "doc": { "_id": "d1" }, "types": [] })
        );
    }

    #[test]
    fn test_fetch_throw_on_not_found() {
        let mut m = machine(
            json!({
                "name": "wf",
                "activities": [{
                    "name": "summarize",
                    "fetch": { "doc": { "type": "document", "limit": 1, "onNotFound": "throw" } }
                }]
            }),
            json!({}),
        );

        m.run_until_suspended().unwrap();
        let err = m.resume(json!([])).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::ParamNotFound { ref activity, ref param } if activity == "summarize" && param == "doc"
        ));
    }

    #[test]
    fn test_failed_resume_keeps_call_pending() {
        let mut m = machine(
            json!({
                "name": "wf",
                "activities": [{
                    "name": "summarize",
                    "fetch": { "doc": { "type": "document", "limit": 1, "onNotFound": "throw" } },
                    "output": "result"
                }]
            }),
            json!({}),
        );

        m.run_until_suspended().unwrap();
        let before = m.clone();

        assert!(m.resume(json!({ "not": "an array" })).is_err());
        assert!(m.resume(json!([])).is_err());
        assert_eq!(m, before);
        assert_eq!(m.pc(), 0);
        assert_eq!(m.phase(), &StepPhase::Fetch { idx: 0 });
        assert!(matches!(m.control(), Control::Suspend(PendingCall::Fetch(_))));
        assert_eq!(m.run_until_suspended().unwrap(), Step::Suspended);

        m.resume(json!([{ "_id": "d1" }])).unwrap();
        assert_eq!(m.control(), &Control::None);
        assert_eq!(m.phase(), &StepPhase::Fetch { idx: 1 });
    }

    #[test]
    fn test_projected_result_is_stored() {
        let mut m = machine(
            json!({
                "name": "wf",
                "activities": [{
                    "name": "classify",
                    "params": { "threshold": 0.5 },
                    "projection": {
                        "label": { "$element": { "from": "#.labels", "where": { "score": { "$gte": "${threshold}" } }, "field": "name" } }
                    },
                    "output": "result"
                }]
            }),
            json!({}),
        );

        m.run_until_suspended().unwrap();
        m.resume(json!({ "labels": [{ "name": "spam", "score": 0.1 }, { "name": "ham", "score": 0.9 }] }))
            .unwrap();
        m.run_until_suspended().unwrap();

        assert_eq!(m.result(), Some(&json!({ "label": "ham" })));
    }

    #[test]
    fn test_skipped_step_records_status() {
        let mut m = machine(
            json!({
                "name": "wf",
                "activities": [{ "name": "a", "condition": { "flag": { "$eq": true } }, "output": "result" }]
            }),
            json!({ "flag": false }),
        );

        assert_eq!(m.run_until_suspended().unwrap(), Step::Done);
        assert_eq!(m.steps()[0].status, StepStatus::Skipped);
        assert!(!m.vars().contains("result"));
    }

    #[test]
    fn test_resume_when_not_suspended_is_invalid() {
        let mut m = machine(json!({ "name": "wf", "activities": [] }), json!({}));
        let err = m.resume(json!(1)).unwrap_err();
        assert_eq!(err.code(), crate::errors::INVALID_STATE);
    }

    #[test]
    fn test_unknown_condition_operator_fails_the_step() {
        let mut m = machine(
            json!({
                "name": "wf",
                "activities": [{ "name": "a", "condition": { "x": { "$like": 1 } } }]
            }),
            json!({}),
        );

        let err = m.run_until_suspended().unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownCondition { ref operator } if operator == "$like"));
    }
}
