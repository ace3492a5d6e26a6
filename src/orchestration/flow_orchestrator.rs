//! # Flow Orchestrator
//!
//! Executes registered [`Flow`]s on top of the [`TaskExecutor`].
//!
//! ## Step Semantics
//!
//! - **Task**: input from the optional input mapping (flow input otherwise),
//!   executed through the task executor, output reshaped by the optional
//!   output mapping. An unsuccessful task result fails the step.
//! - **Parallel**: children run in batches of
//!   `min(concurrency_limit, max_parallel_executions)`. Each batch settles
//!   fully before the next starts. The output array follows declaration
//!   order, not completion order.
//! - **Condition**: the predicate picks `then_steps` or `else_steps`. The
//!   step's output is the last branch output, or null for an empty branch.
//! - **Wait**: sleeps; a zero duration is a configuration failure.
//!
//! With `continue_on_error` a failed step is recorded, its output is null
//! and execution moves on. Without it the flow stops at the first failure
//! and the result carries that error. Unknown task or flow ids are never
//! absorbed: they are returned as `Err`.

use crate::constants::events;
use crate::error::{DefinitionKind, ExecutionFailure, Result, RuntimeError};
use crate::events::EventBus;
use crate::logging::log_flow_operation;
use crate::orchestration::flow::{Flow, FlowStep, FlowStepKind, StepOutputs};
use crate::orchestration::task_executor::{TaskExecutionResult, TaskExecutor};
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowOptions {
    /// Record step failures and keep going instead of aborting
    pub continue_on_error: bool,

    /// Upper bound on any parallel step's batch size
    pub max_parallel_executions: usize,
}

impl FlowOptions {
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn with_max_parallel_executions(mut self, max_parallel_executions: usize) -> Self {
        self.max_parallel_executions = max_parallel_executions;
        self
    }
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            max_parallel_executions: 10,
        }
    }
}

/// A step failure recorded during a flow run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowStepFailure {
    pub step_id: String,
    pub error: ExecutionFailure,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowExecutionResult {
    pub flow_id: String,
    pub success: bool,
    /// Task results keyed by step id, failed ones included
    pub step_results: HashMap<String, TaskExecutionResult>,
    /// Outputs of every step that produced one, keyed by step id
    pub step_outputs: StepOutputs,
    /// Output of the last top-level step
    pub output: Value,
    /// Failures of leaf steps (task and wait) in the order they were recorded
    pub failed_steps: Vec<FlowStepFailure>,
    /// The error that stopped the flow
    pub error: Option<ExecutionFailure>,
    pub elapsed: Duration,
}

#[derive(Default)]
struct RunState {
    step_results: HashMap<String, TaskExecutionResult>,
    step_outputs: StepOutputs,
    failed_steps: Vec<FlowStepFailure>,
}

/// Per-call context shared by every step of one flow run
struct FlowRun<'a> {
    flow_id: &'a str,
    input: &'a Value,
    options: FlowOptions,
    state: Mutex<RunState>,
}

impl FlowRun<'_> {
    fn outputs_snapshot(&self) -> StepOutputs {
        self.state.lock().step_outputs.clone()
    }
}

#[derive(Debug)]
pub struct FlowOrchestrator {
    flows: DashMap<String, Arc<Flow>>,
    task_executor: Arc<TaskExecutor>,
    event_bus: EventBus,
    default_options: FlowOptions,
}

impl FlowOrchestrator {
    pub fn new(task_executor: Arc<TaskExecutor>, event_bus: EventBus) -> Self {
        Self {
            flows: DashMap::new(),
            task_executor,
            event_bus,
            default_options: FlowOptions::default(),
        }
    }

    pub fn with_default_options(mut self, options: FlowOptions) -> Self {
        self.default_options = options;
        self
    }

    pub fn register_flow(&self, flow: Flow) {
        debug!(flow_id = %flow.id, steps = flow.steps.len(), "Registering flow");
        self.flows.insert(flow.id.clone(), Arc::new(flow));
    }

    pub fn get_flow(&self, flow_id: &str) -> Result<Arc<Flow>> {
        self.flows
            .get(flow_id)
            .map(|f| Arc::clone(f.value()))
            .ok_or_else(|| RuntimeError::definition_not_found(DefinitionKind::Flow, flow_id))
    }

    pub fn flow_ids(&self) -> Vec<String> {
        self.flows.iter().map(|e| e.key().clone()).collect()
    }

    #[instrument(skip(self, input, options), fields(flow_id = %flow_id))]
    pub async fn execute_flow(
        &self,
        flow_id: &str,
        input: Value,
        options: Option<FlowOptions>,
    ) -> Result<FlowExecutionResult> {
        let flow = self.get_flow(flow_id)?;
        let options = options.unwrap_or_else(|| self.default_options.clone());
        if options.max_parallel_executions == 0 {
            return Err(RuntimeError::Configuration(
                "max_parallel_executions must be greater than 0".to_string(),
            ));
        }

        let started = Instant::now();
        info!(flow_id, continue_on_error = options.continue_on_error, "🚀 Starting flow");
        log_flow_operation("execute", flow_id, None, "started", None);
        self.event_bus
            .publish(events::FLOW_STARTED, json!({ "flow_id": flow_id, "input": input }))
            .await;

        let run = FlowRun {
            flow_id,
            input: &input,
            options,
            state: Mutex::new(RunState::default()),
        };
        let outcome = self.run_sequence(&run, &flow.steps).await;
        let elapsed = started.elapsed();
        let state = run.state.into_inner();

        let error = match outcome {
            Ok(output) => {
                info!(
                    flow_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    recorded_failures = state.failed_steps.len(),
                    "✅ Flow completed"
                );
                self.event_bus
                    .publish(
                        events::FLOW_COMPLETED,
                        json!({
                            "flow_id": flow_id,
                            "output": output,
                            "failed_steps": state.failed_steps,
                            "elapsed_ms": elapsed.as_millis() as u64,
                        }),
                    )
                    .await;
                return Ok(FlowExecutionResult {
                    flow_id: flow_id.to_string(),
                    success: true,
                    step_results: state.step_results,
                    step_outputs: state.step_outputs,
                    output,
                    failed_steps: state.failed_steps,
                    error: None,
                    elapsed,
                });
            }
            Err(error) => error,
        };

        warn!(flow_id, error = %error, "❌ Flow failed");
        log_flow_operation("execute", flow_id, None, "failed", Some(&error.to_string()));
        self.event_bus
            .publish(
                events::FLOW_FAILED,
                json!({
                    "flow_id": flow_id,
                    "error": error.to_string(),
                    "elapsed_ms": elapsed.as_millis() as u64,
                }),
            )
            .await;

        if error.is_identity_error() {
            return Err(error);
        }

        Ok(FlowExecutionResult {
            flow_id: flow_id.to_string(),
            success: false,
            step_results: state.step_results,
            step_outputs: state.step_outputs,
            output: Value::Null,
            failed_steps: state.failed_steps,
            error: Some(ExecutionFailure::from(&error)),
            elapsed,
        })
    }

    /// Run steps in order; the output is the last step's output
    fn run_sequence<'a>(
        &'a self,
        run: &'a FlowRun<'a>,
        steps: &'a [FlowStep],
    ) -> BoxFuture<'a, Result<Value>> {
        async move {
            let mut last = Value::Null;
            for step in steps {
                last = self.run_step(run, step).await?;
            }
            Ok(last)
        }
        .boxed()
    }

    /// Run one step with its events, recording output or failure
    fn run_step<'a>(&'a self, run: &'a FlowRun<'a>, step: &'a FlowStep) -> BoxFuture<'a, Result<Value>> {
        async move {
            let kind = step.kind.name();
            debug!(flow_id = run.flow_id, step_id = %step.id, kind, "Starting flow step");
            self.event_bus
                .publish(
                    events::FLOW_STEP_STARTED,
                    json!({ "flow_id": run.flow_id, "step_id": step.id, "kind": kind }),
                )
                .await;

            let error = match self.dispatch(run, step).await {
                Ok(output) => {
                    run.state
                        .lock()
                        .step_outputs
                        .insert(step.id.clone(), output.clone());
                    self.event_bus
                        .publish(
                            events::FLOW_STEP_COMPLETED,
                            json!({ "flow_id": run.flow_id, "step_id": step.id, "kind": kind, "output": output }),
                        )
                        .await;
                    return Ok(output);
                }
                Err(error) if error.is_identity_error() => {
                    warn!(flow_id = run.flow_id, step_id = %step.id, kind, error = %error, "❌ Flow step references unknown definition");
                    self.event_bus
                        .publish(
                            events::FLOW_STEP_FAILED,
                            json!({
                                "flow_id": run.flow_id,
                                "step_id": step.id,
                                "kind": kind,
                                "error": ExecutionFailure::from(&error),
                            }),
                        )
                        .await;
                    return Err(error);
                }
                Err(error) => error,
            };

            // Nested failures keep their innermost step id
            let error = match error {
                RuntimeError::StepFailure { .. } | RuntimeError::Configuration(_) => error,
                other => RuntimeError::StepFailure {
                    step_id: step.id.clone(),
                    reason: other.to_string(),
                },
            };
            let failure = ExecutionFailure::from(&error);
            warn!(flow_id = run.flow_id, step_id = %step.id, kind, error = %failure, "⚠️ Flow step failed");
            log_flow_operation("step", run.flow_id, Some(&step.id), "failed", Some(&failure.message));
            // A composite step only fails through a child, which recorded itself
            if !step.kind.is_composite() {
                run.state.lock().failed_steps.push(FlowStepFailure {
                    step_id: step.id.clone(),
                    error: failure.clone(),
                });
            }
            self.event_bus
                .publish(
                    events::FLOW_STEP_FAILED,
                    json!({ "flow_id": run.flow_id, "step_id": step.id, "kind": kind, "error": failure }),
                )
                .await;

            if run.options.continue_on_error {
                run.state
                    .lock()
                    .step_outputs
                    .insert(step.id.clone(), Value::Null);
                Ok(Value::Null)
            } else {
                Err(error)
            }
        }
        .boxed()
    }

    async fn dispatch<'a>(&'a self, run: &'a FlowRun<'a>, step: &'a FlowStep) -> Result<Value> {
        match &step.kind {
            FlowStepKind::Task {
                task_id,
                input_mapping,
                output_mapping,
                options,
            } => {
                let task_input = match input_mapping {
                    Some(mapping) => mapping(run.input, &run.outputs_snapshot()),
                    None => run.input.clone(),
                };
                let result = self
                    .task_executor
                    .execute_task(task_id, task_input, options.clone())
                    .await?;
                let success = result.success;
                let output = result.output.clone();
                let failure = result.error.clone();
                run.state.lock().step_results.insert(step.id.clone(), result);

                if !success {
                    return Err(RuntimeError::StepFailure {
                        step_id: step.id.clone(),
                        reason: failure
                            .map(|f| f.to_string())
                            .unwrap_or_else(|| format!("task {task_id} failed")),
                    });
                }
                Ok(match output_mapping {
                    Some(mapping) => mapping(output),
                    None => output,
                })
            }
            FlowStepKind::Parallel {
                steps,
                concurrency_limit,
            } => {
                let batch_size = (*concurrency_limit)
                    .min(run.options.max_parallel_executions)
                    .max(1);
                let mut outputs = Vec::with_capacity(steps.len());
                for batch in steps.chunks(batch_size) {
                    let settled = join_all(batch.iter().map(|child| self.run_step(run, child))).await;
                    let mut first_error = None;
                    for outcome in settled {
                        match outcome {
                            Ok(output) => outputs.push(output),
                            Err(error) => {
                                first_error.get_or_insert(error);
                            }
                        }
                    }
                    if let Some(error) = first_error {
                        return Err(error);
                    }
                }
                Ok(Value::Array(outputs))
            }
            FlowStepKind::Condition {
                predicate,
                then_steps,
                else_steps,
            } => {
                let branch = if predicate(run.input, &run.outputs_snapshot()) {
                    then_steps
                } else {
                    else_steps
                };
                self.run_sequence(run, branch).await
            }
            FlowStepKind::Wait { duration } => {
                if duration.is_zero() {
                    return Err(RuntimeError::Configuration(format!(
                        "wait step {} needs a positive duration",
                        step.id
                    )));
                }
                tokio::time::sleep(*duration).await;
                Ok(Value::Null)
            }
        }
    }
}
