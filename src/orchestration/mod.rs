//! # Orchestration Engine
//!
//! Execution of work on top of the event bus and circuit breakers.
//!
//! ## Core Components
//!
//! - **TaskExecutor**: runs registered task implementations under retry,
//!   timeout and optional per-task circuit breaking
//! - **FlowOrchestrator**: composes task executions into sequential,
//!   parallel, conditional and wait steps
//! - **SagaCoordinator**: ordered forward steps with compensation on failure
//! - **RetryPolicy**: fixed, linear and exponential backoff
//!
//! Flows and sagas both call into the task executor, so every task they run
//! carries that task's own retry and timeout policy.

pub mod flow;
pub mod flow_orchestrator;
pub mod retry;
pub mod saga;
pub mod task_executor;

pub use flow::{
    ConditionPredicate, Flow, FlowStep, FlowStepKind, InputMapping, OutputMapping, StepOutputs,
};
pub use flow_orchestrator::{FlowExecutionResult, FlowOptions, FlowOrchestrator, FlowStepFailure};
pub use retry::{BackoffKind, RetryPolicy, RetryPredicate};
pub use saga::{
    CompensationStrategy, SagaCoordinator, SagaDefinition, SagaInstance, SagaResult, SagaStatus,
    SagaStep, SagaStepState, SagaStepStatus,
};
pub use task_executor::{
    FnTaskHandler, TaskDefinition, TaskExecutionOptions, TaskExecutionResult, TaskExecutor,
    TaskHandler,
};
