//! # Saga Coordinator
//!
//! Multi-step transactions where every step pairs a forward task with an
//! optional compensating task. Both are task ids resolved through the
//! [`TaskExecutor`], so each inherits that task's retry and timeout policy.
//!
//! ## Execution
//!
//! Steps run strictly in declared order against an accumulated data object:
//!
//! 1. The step input is built from the accumulated data through the step's
//!    input mapping (the whole data object when no mapping is declared).
//! 2. On success the mapped output is merged into the data and the step is
//!    marked `completed`.
//! 3. On failure the step is marked `failed`, no later step runs, and the
//!    completed steps are compensated: in reverse declared order under
//!    [`CompensationStrategy::Backward`], in declared order under
//!    [`CompensationStrategy::Forward`].
//!
//! The failed step is never compensated. A failing compensation is recorded
//! on its step and the sweep carries on with the remaining steps.
//!
//! ## Field Mappings
//!
//! Mappings are `destination field -> source field`. Input mappings read the
//! accumulated data, output mappings read the forward task's output object.
//! Without an output mapping an object output is merged as-is and any other
//! value is stored under the step name.

use crate::constants::events;
use crate::error::{DefinitionKind, ExecutionFailure, Result, RuntimeError};
use crate::events::EventBus;
use crate::logging::log_saga_operation;
use crate::orchestration::task_executor::TaskExecutor;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationStrategy {
    /// Undo completed steps newest first
    #[default]
    Backward,
    /// Undo completed steps in declared order
    Forward,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaStep {
    pub name: String,
    /// Task id of the forward operation
    pub forward: String,
    /// Task id of the compensating operation
    pub compensation: Option<String>,
    pub input_mapping: HashMap<String, String>,
    pub output_mapping: HashMap<String, String>,
}

impl SagaStep {
    pub fn new(name: impl Into<String>, forward: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            forward: forward.into(),
            ..Self::default()
        }
    }

    pub fn with_compensation(mut self, task_id: impl Into<String>) -> Self {
        self.compensation = Some(task_id.into());
        self
    }

    /// Feed `data[source]` to the forward task as `input[destination]`
    pub fn map_input(mut self, destination: impl Into<String>, source: impl Into<String>) -> Self {
        self.input_mapping.insert(destination.into(), source.into());
        self
    }

    /// Store `output[source]` into the accumulated data as `data[destination]`
    pub fn map_output(mut self, destination: impl Into<String>, source: impl Into<String>) -> Self {
        self.output_mapping.insert(destination.into(), source.into());
        self
    }

    fn build_input(&self, data: &Map<String, Value>) -> Value {
        if self.input_mapping.is_empty() {
            return Value::Object(data.clone());
        }
        Value::Object(
            self.input_mapping
                .iter()
                .filter_map(|(destination, source)| {
                    data.get(source).map(|v| (destination.clone(), v.clone()))
                })
                .collect(),
        )
    }

    fn extract_output(&self, output: &Value) -> Map<String, Value> {
        if self.output_mapping.is_empty() {
            return match output {
                Value::Object(fields) => fields.clone(),
                Value::Null => Map::new(),
                other => Map::from_iter([(self.name.clone(), other.clone())]),
            };
        }
        self.output_mapping
            .iter()
            .filter_map(|(destination, source)| {
                output.get(source).map(|v| (destination.clone(), v.clone()))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaDefinition {
    pub id: String,
    /// Field of the initial data that identifies the business transaction
    pub correlation_property: Option<String>,
    pub steps: Vec<SagaStep>,
    pub compensation_strategy: CompensationStrategy,
}

impl SagaDefinition {
    pub fn new(id: impl Into<String>, steps: Vec<SagaStep>) -> Self {
        Self {
            id: id.into(),
            correlation_property: None,
            steps,
            compensation_strategy: CompensationStrategy::default(),
        }
    }

    pub fn with_correlation_property(mut self, property: impl Into<String>) -> Self {
        self.correlation_property = Some(property.into());
        self
    }

    pub fn with_compensation_strategy(mut self, strategy: CompensationStrategy) -> Self {
        self.compensation_strategy = strategy;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    New,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStepStatus {
    Pending,
    Completed,
    Failed,
    Compensated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStepState {
    pub name: String,
    pub status: SagaStepStatus,
    pub input: Option<Value>,
    /// Mapped output fields merged into the saga data
    pub output: Option<Map<String, Value>>,
    pub error: Option<ExecutionFailure>,
    pub compensation_error: Option<ExecutionFailure>,
}

impl SagaStepState {
    fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: SagaStepStatus::Pending,
            input: None,
            output: None,
            error: None,
            compensation_error: None,
        }
    }

    /// Input for the compensating task: forward input overlaid with mapped output
    fn compensation_input(&self) -> Value {
        let mut fields = match &self.input {
            Some(Value::Object(fields)) => fields.clone(),
            _ => Map::new(),
        };
        if let Some(output) = &self.output {
            fields.extend(output.clone());
        }
        Value::Object(fields)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    pub id: Uuid,
    pub saga_id: String,
    pub correlation_id: Option<String>,
    pub status: SagaStatus,
    pub steps: Vec<SagaStepState>,
    pub data: Map<String, Value>,
    pub error: Option<ExecutionFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaInstance {
    pub fn step(&self, name: &str) -> Option<&SagaStepState> {
        self.steps.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SagaResult {
    pub instance_id: Uuid,
    pub status: SagaStatus,
    pub steps: Vec<SagaStepState>,
    pub data: Value,
    /// The forward failure that triggered compensation
    pub error: Option<ExecutionFailure>,
}

impl SagaResult {
    pub fn step(&self, name: &str) -> Option<&SagaStepState> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn compensation_errors(&self) -> Vec<(&str, &ExecutionFailure)> {
        self.steps
            .iter()
            .filter_map(|s| s.compensation_error.as_ref().map(|e| (s.name.as_str(), e)))
            .collect()
    }
}

/// A live instance and the definition it was started from
#[derive(Debug)]
struct SagaRun {
    definition: Arc<SagaDefinition>,
    state: Mutex<SagaInstance>,
}

#[derive(Debug)]
pub struct SagaCoordinator {
    definitions: DashMap<String, Arc<SagaDefinition>>,
    instances: DashMap<Uuid, Arc<SagaRun>>,
    task_executor: Arc<TaskExecutor>,
    event_bus: EventBus,
}

impl SagaCoordinator {
    pub fn new(task_executor: Arc<TaskExecutor>, event_bus: EventBus) -> Self {
        Self {
            definitions: DashMap::new(),
            instances: DashMap::new(),
            task_executor,
            event_bus,
        }
    }

    pub fn register_saga(&self, definition: SagaDefinition) {
        debug!(saga_id = %definition.id, steps = definition.steps.len(), "Registering saga definition");
        self.definitions
            .insert(definition.id.clone(), Arc::new(definition));
    }

    pub fn get_saga(&self, saga_id: &str) -> Result<Arc<SagaDefinition>> {
        self.definitions
            .get(saga_id)
            .map(|d| Arc::clone(d.value()))
            .ok_or_else(|| RuntimeError::definition_not_found(DefinitionKind::Saga, saga_id))
    }

    /// Create a new instance; nothing runs until [`execute_saga`](Self::execute_saga)
    pub async fn start_saga(&self, saga_id: &str, initial_data: Value) -> Result<SagaInstance> {
        let definition = self.get_saga(saga_id)?;
        let data = match initial_data {
            Value::Object(fields) => fields,
            Value::Null => Map::new(),
            other => {
                return Err(RuntimeError::Configuration(format!(
                    "saga data must be a JSON object, got {other}"
                )))
            }
        };

        let correlation_id = definition
            .correlation_property
            .as_deref()
            .and_then(|property| data.get(property))
            .map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });

        let now = Utc::now();
        let instance = SagaInstance {
            id: Uuid::new_v4(),
            saga_id: definition.id.clone(),
            correlation_id,
            status: SagaStatus::New,
            steps: definition
                .steps
                .iter()
                .map(|s| SagaStepState::pending(&s.name))
                .collect(),
            data,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.instances.insert(
            instance.id,
            Arc::new(SagaRun {
                definition,
                state: Mutex::new(instance.clone()),
            }),
        );

        log_saga_operation("start", saga_id, &instance.id.to_string(), None, "new");
        Ok(instance)
    }

    pub fn get_saga_instance(&self, instance_id: Uuid) -> Result<SagaInstance> {
        Ok(self.instance_handle(instance_id)?.state.lock().clone())
    }

    /// Run every step, compensating on the first forward failure.
    ///
    /// The instance runs against the definition it was started from, even if
    /// the saga id has been re-registered since. An instance executes at
    /// most once; a second call is `InvalidState`.
    #[instrument(skip(self), fields(instance_id = %instance_id))]
    pub async fn execute_saga(&self, instance_id: Uuid) -> Result<SagaResult> {
        let handle = self.instance_handle(instance_id)?;
        let mut instance = {
            let mut guard = handle.state.lock();
            if guard.status != SagaStatus::New {
                return Err(RuntimeError::InvalidState {
                    entity: "saga instance",
                    id: instance_id,
                    reason: format!("already {:?}", guard.status).to_lowercase(),
                });
            }
            guard.status = SagaStatus::Running;
            guard.updated_at = Utc::now();
            guard.clone()
        };
        let definition = Arc::clone(&handle.definition);
        let saga_id = definition.id.as_str();
        let id_str = instance_id.to_string();

        info!(saga_id, correlation_id = ?instance.correlation_id, "🚀 Starting saga");
        self.event_bus
            .publish(
                events::SAGA_STARTED,
                json!({
                    "saga_id": saga_id,
                    "instance_id": instance_id,
                    "correlation_id": instance.correlation_id,
                }),
            )
            .await;

        let mut failed_at = None;
        for (index, step) in definition.steps.iter().enumerate() {
            let input = step.build_input(&instance.data);
            instance.steps[index].input = Some(input.clone());

            match self.run_task(&step.forward, input).await {
                Ok(output) => {
                    let mapped = step.extract_output(&output);
                    instance.data.extend(mapped.clone());
                    let state = &mut instance.steps[index];
                    state.status = SagaStepStatus::Completed;
                    state.output = Some(mapped);
                    self.checkpoint(&handle, &instance);

                    log_saga_operation("step", saga_id, &id_str, Some(&step.name), "completed");
                    self.event_bus
                        .publish(
                            events::SAGA_STEP_COMPLETED,
                            json!({ "saga_id": saga_id, "instance_id": instance_id, "step": step.name }),
                        )
                        .await;
                }
                Err(failure) => {
                    let state = &mut instance.steps[index];
                    state.status = SagaStepStatus::Failed;
                    state.error = Some(failure.clone());
                    instance.error = Some(failure.clone());
                    self.checkpoint(&handle, &instance);

                    warn!(saga_id, step = %step.name, error = %failure, "❌ Saga step failed");
                    self.event_bus
                        .publish(
                            events::SAGA_STEP_FAILED,
                            json!({
                                "saga_id": saga_id,
                                "instance_id": instance_id,
                                "step": step.name,
                                "error": failure,
                            }),
                        )
                        .await;
                    failed_at = Some(index);
                    break;
                }
            }
        }

        if let Some(failed_index) = failed_at {
            self.compensate(&definition, &mut instance, failed_index).await;
            instance.status = SagaStatus::Failed;
        } else {
            instance.status = SagaStatus::Completed;
        }
        self.checkpoint(&handle, &instance);

        let (event_type, status) = match instance.status {
            SagaStatus::Completed => (events::SAGA_COMPLETED, "completed"),
            _ => (events::SAGA_FAILED, "failed"),
        };
        log_saga_operation("execute", saga_id, &id_str, None, status);
        self.event_bus
            .publish(
                event_type,
                json!({
                    "saga_id": saga_id,
                    "instance_id": instance_id,
                    "correlation_id": instance.correlation_id,
                    "error": instance.error,
                }),
            )
            .await;

        Ok(SagaResult {
            instance_id,
            status: instance.status,
            steps: instance.steps,
            data: Value::Object(instance.data),
            error: instance.error,
        })
    }

    async fn compensate(&self, definition: &SagaDefinition, instance: &mut SagaInstance, failed_index: usize) {
        let saga_id = definition.id.as_str();
        let instance_id = instance.id;
        let completed: Vec<usize> = match definition.compensation_strategy {
            CompensationStrategy::Backward => (0..failed_index).rev().collect(),
            CompensationStrategy::Forward => (0..failed_index).collect(),
        };

        info!(saga_id, steps = completed.len(), strategy = ?definition.compensation_strategy, "↩️ Compensating saga");
        self.event_bus
            .publish(
                events::SAGA_COMPENSATING,
                json!({
                    "saga_id": saga_id,
                    "instance_id": instance_id,
                    "strategy": definition.compensation_strategy,
                }),
            )
            .await;

        for index in completed {
            let step = &definition.steps[index];
            let Some(compensation) = &step.compensation else {
                debug!(saga_id, step = %step.name, "No compensation declared, skipping");
                continue;
            };
            if instance.steps[index].status != SagaStepStatus::Completed {
                continue;
            }

            let input = instance.steps[index].compensation_input();
            match self.run_task(compensation, input).await {
                Ok(_) => {
                    instance.steps[index].status = SagaStepStatus::Compensated;
                    log_saga_operation("compensate", saga_id, &instance_id.to_string(), Some(&step.name), "compensated");
                    self.event_bus
                        .publish(
                            events::SAGA_STEP_COMPENSATED,
                            json!({ "saga_id": saga_id, "instance_id": instance_id, "step": step.name }),
                        )
                        .await;
                }
                Err(failure) => {
                    let error = RuntimeError::Compensation {
                        step: step.name.clone(),
                        reason: failure.to_string(),
                    };
                    error!(saga_id, step = %step.name, error = %error, "💥 Compensation failed");
                    let failure = ExecutionFailure::from(&error);
                    instance.steps[index].compensation_error = Some(failure.clone());
                    self.event_bus
                        .publish(
                            events::SAGA_COMPENSATION_FAILED,
                            json!({
                                "saga_id": saga_id,
                                "instance_id": instance_id,
                                "step": step.name,
                                "error": failure,
                            }),
                        )
                        .await;
                }
            }
        }
    }

    /// Any execution problem, unknown task ids included, is a step failure
    async fn run_task(&self, task_id: &str, input: Value) -> std::result::Result<Value, ExecutionFailure> {
        match self.task_executor.execute_task(task_id, input, None).await {
            Ok(result) if result.success => Ok(result.output),
            Ok(result) => Err(result
                .error
                .unwrap_or_else(|| ExecutionFailure::execution(format!("task {task_id} failed")))),
            Err(err) => Err(ExecutionFailure::from(&err)),
        }
    }

    fn checkpoint(&self, handle: &SagaRun, instance: &SagaInstance) {
        let mut guard = handle.state.lock();
        *guard = instance.clone();
        guard.updated_at = Utc::now();
    }

    fn instance_handle(&self, instance_id: Uuid) -> Result<Arc<SagaRun>> {
        self.instances
            .get(&instance_id)
            .map(|i| Arc::clone(i.value()))
            .ok_or(RuntimeError::InstanceNotFound {
                kind: DefinitionKind::Saga,
                id: instance_id,
            })
    }
}
