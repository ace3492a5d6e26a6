//! # Reactive Runtime
//!
//! Owns one instance of every component and wires them together. There are
//! no process-wide registries: independent runtimes can coexist, which is
//! what the integration tests rely on.
//!
//! ## Wiring
//!
//! - every component publishes on the same [`EventBus`]
//! - circuit breakers are attached to the bus and shared with the task executor
//! - flows and sagas run their tasks through the shared [`TaskExecutor`]
//! - the process manager listens for `process.transition.requested` events
//!
//! ```rust
//! use procflow_core::{ReactiveRuntime, RuntimeConfig, TaskDefinition};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let runtime = ReactiveRuntime::new(RuntimeConfig::default()).unwrap();
//! runtime.register_task(TaskDefinition::new("greet"));
//! runtime.register_task_fn("greet", |input| async move {
//!     Ok(json!({ "greeting": format!("hello {}", input["name"].as_str().unwrap_or("?")) }))
//! });
//!
//! let result = runtime.execute_task("greet", json!({ "name": "ada" }), None).await.unwrap();
//! assert!(result.success);
//! assert_eq!(result.output["greeting"], "hello ada");
//! # });
//! ```

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::events::{self, Event, EventBus, EventSubscriber, HandlerError, HookPoint, SubscriptionId};
use crate::orchestration::{
    Flow, FlowExecutionResult, FlowOptions, FlowOrchestrator, SagaCoordinator, SagaDefinition,
    SagaInstance, SagaResult, TaskDefinition, TaskExecutionOptions, TaskExecutionResult,
    TaskExecutor, TaskHandler,
};
use crate::resilience::{CircuitBreaker, CircuitBreakerManager};
use crate::state_machine::{ProcessDefinition, ProcessInstance, ProcessManager};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

pub struct ReactiveRuntime {
    config: RuntimeConfig,
    event_bus: EventBus,
    circuit_breakers: Arc<CircuitBreakerManager>,
    processes: Arc<ProcessManager>,
    tasks: Arc<TaskExecutor>,
    flows: FlowOrchestrator,
    sagas: SagaCoordinator,
}

impl std::fmt::Debug for ReactiveRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveRuntime")
            .field("config", &self.config)
            .field("event_bus", &self.event_bus)
            .field("process_instances", &self.processes.instance_count())
            .field("tasks", &self.tasks)
            .finish_non_exhaustive()
    }
}

impl ReactiveRuntime {
    /// Validate `config` and build a fully wired runtime
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: RuntimeConfig) -> Self {
        let event_bus = EventBus::with_config(&config.events);
        let circuit_breakers = Arc::new(
            CircuitBreakerManager::new(config.circuit_breaker.clone())
                .with_event_bus(event_bus.clone()),
        );
        let processes = Arc::new(ProcessManager::new(event_bus.clone()));
        processes.bind_to_bus();

        let tasks = Arc::new(
            TaskExecutor::new(event_bus.clone(), Arc::clone(&circuit_breakers))
                .with_defaults(config.retry.clone(), config.task.clone()),
        );
        let flows = FlowOrchestrator::new(Arc::clone(&tasks), event_bus.clone())
            .with_default_options(config.flow.clone());
        let sagas = SagaCoordinator::new(Arc::clone(&tasks), event_bus.clone());

        info!(
            version = crate::constants::system::PROCFLOW_CORE_VERSION,
            max_attempts = config.retry.max_attempts,
            task_timeout_ms = config.task.timeout_ms,
            "🏗️ Reactive runtime initialized"
        );

        Self {
            config,
            event_bus,
            circuit_breakers,
            processes,
            tasks,
            flows,
            sagas,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn process_manager(&self) -> &Arc<ProcessManager> {
        &self.processes
    }

    pub fn task_executor(&self) -> &Arc<TaskExecutor> {
        &self.tasks
    }

    pub fn flow_orchestrator(&self) -> &FlowOrchestrator {
        &self.flows
    }

    pub fn saga_coordinator(&self) -> &SagaCoordinator {
        &self.sagas
    }

    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.circuit_breakers
    }

    /// Named breaker for guarding arbitrary calls, created on first use
    pub fn circuit_breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.circuit_breakers.get_or_create(name)
    }

    // Processes

    pub fn register_process(&self, definition: ProcessDefinition) {
        self.processes.register_definition(definition);
    }

    pub async fn create_process(&self, process_id: &str, initial_context: Value) -> Result<ProcessInstance> {
        self.processes.create_process(process_id, initial_context).await
    }

    pub async fn transition_process(
        &self,
        instance_id: Uuid,
        event: &str,
        context_patch: Option<Value>,
    ) -> Result<ProcessInstance> {
        self.processes
            .transition_process(instance_id, event, context_patch)
            .await
    }

    pub async fn get_process_state(&self, instance_id: Uuid) -> Result<String> {
        self.processes.get_process_state(instance_id).await
    }

    // Tasks

    pub fn register_task(&self, definition: TaskDefinition) {
        self.tasks.register_task(definition);
    }

    pub fn register_task_implementation(&self, task_id: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.tasks.register_task_implementation(task_id, handler);
    }

    pub fn register_task_fn<F, Fut>(&self, task_id: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.tasks.register_task_fn(task_id, handler);
    }

    pub async fn execute_task(
        &self,
        task_id: &str,
        input: Value,
        options: Option<TaskExecutionOptions>,
    ) -> Result<TaskExecutionResult> {
        self.tasks.execute_task(task_id, input, options).await
    }

    // Flows

    pub fn register_flow(&self, flow: Flow) {
        self.flows.register_flow(flow);
    }

    pub async fn execute_flow(
        &self,
        flow_id: &str,
        input: Value,
        options: Option<FlowOptions>,
    ) -> Result<FlowExecutionResult> {
        self.flows.execute_flow(flow_id, input, options).await
    }

    // Sagas

    pub fn register_saga(&self, definition: SagaDefinition) {
        self.sagas.register_saga(definition);
    }

    pub async fn start_saga(&self, saga_id: &str, initial_data: Value) -> Result<SagaInstance> {
        self.sagas.start_saga(saga_id, initial_data).await
    }

    pub async fn execute_saga(&self, instance_id: Uuid) -> Result<SagaResult> {
        self.sagas.execute_saga(instance_id).await
    }

    pub fn get_saga_instance(&self, instance_id: Uuid) -> Result<SagaInstance> {
        self.sagas.get_saga_instance(instance_id)
    }

    // Events

    pub fn subscribe_to_event(
        &self,
        pattern: impl Into<String>,
        subscriber: Arc<dyn EventSubscriber>,
    ) -> SubscriptionId {
        self.event_bus.subscribe(pattern, subscriber)
    }

    pub fn subscribe_fn<F, Fut>(&self, pattern: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
    {
        self.event_bus.subscribe_fn(pattern, handler)
    }

    pub fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        self.event_bus.unsubscribe(subscription)
    }

    pub async fn publish(&self, event_type: impl Into<String>, payload: Value) -> Event {
        self.event_bus.publish(event_type, payload).await
    }

    /// Receiver observing every event published from now on
    pub fn subscribe_channel(&self) -> broadcast::Receiver<Event> {
        self.event_bus.subscribe_channel()
    }

    pub fn register_hook(&self, point: HookPoint, hook: Arc<dyn EventSubscriber>) -> Vec<SubscriptionId> {
        events::register_hook(&self.event_bus, point, hook)
    }

    pub fn unregister_hook(&self, subscriptions: &[SubscriptionId]) {
        events::unregister_hook(&self.event_bus, subscriptions);
    }
}

impl Default for ReactiveRuntime {
    fn default() -> Self {
        Self::build(RuntimeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use serde_json::json;

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = RuntimeConfig::default();
        config.events.channel_capacity = 0;
        let err = ReactiveRuntime::new(config).unwrap_err();
        assert!(matches!(err, RuntimeError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_runtimes_are_independent() {
        let first = ReactiveRuntime::default();
        let second = ReactiveRuntime::default();
        first.register_task(TaskDefinition::new("only_here"));
        first.register_task_fn("only_here", |_| async { Ok(json!(1)) });

        assert!(first.execute_task("only_here", Value::Null, None).await.is_ok());
        assert!(second.execute_task("only_here", Value::Null, None).await.is_err());
    }

    #[tokio::test]
    async fn test_transition_requested_over_the_bus() {
        let runtime = ReactiveRuntime::default();
        runtime.register_process(
            ProcessDefinition::new("door", vec!["closed", "open"], "closed")
                .with_transition(crate::state_machine::Transition::new("closed", "open", "OPEN")),
        );
        let instance = runtime.create_process("door", Value::Null).await.unwrap();

        runtime
            .publish(
                crate::constants::events::PROCESS_TRANSITION_REQUESTED,
                json!({ "instance_id": instance.id, "event": "OPEN" }),
            )
            .await;

        assert_eq!(runtime.get_process_state(instance.id).await.unwrap(), "open");
    }
}
