#![allow(clippy::doc_markdown)] // Allow technical terms like HALF_OPEN in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Procflow Core
//!
//! Reactive-process orchestration runtime: business workflows built from
//! typed tasks, state-machine-governed processes and compensating
//! multi-step transactions, all under explicit failure-handling policies.
//!
//! ## Overview
//!
//! The runtime is an in-process execution engine. Definitions come from the
//! hosting application and implementations are plain async closures or
//! [`TaskHandler`] types. Every component announces its lifecycle on a shared
//! [`EventBus`], which is also how hooks and external listeners plug in.
//!
//! ## Module Organization
//!
//! - [`events`] - Publish/subscribe bus with wildcard patterns and hooks
//! - [`state_machine`] - Process definitions and live process instances
//! - [`resilience`] - Circuit breakers and their registry
//! - [`orchestration`] - Task executor, flow orchestrator, saga coordinator
//! - [`runtime`] - The context object wiring everything together
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Failure Handling
//!
//! Unknown ids are returned as `Err` immediately. Operational failures a
//! policy can absorb (retries, fallbacks, compensation, `continue_on_error`)
//! are reported inside the result types instead: [`TaskExecutionResult`],
//! [`FlowExecutionResult`] and [`SagaResult`] all carry a success flag and
//! an optional [`ExecutionFailure`].
//!
//! ## Quick Start
//!
//! ```rust
//! use procflow_core::{Flow, FlowStep, ReactiveRuntime, TaskDefinition};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let runtime = ReactiveRuntime::default();
//! runtime.register_task(TaskDefinition::new("add_one"));
//! runtime.register_task_fn("add_one", |input| async move {
//!     Ok(json!(input.as_i64().unwrap_or(0) + 1))
//! });
//!
//! runtime.register_flow(Flow::new(
//!     "twice",
//!     vec![
//!         FlowStep::task("first", "add_one"),
//!         FlowStep::task("second", "add_one").with_input_mapping(|_, outputs| outputs["first"].clone()),
//!     ],
//! ));
//!
//! let result = runtime.execute_flow("twice", json!(1), None).await.unwrap();
//! assert!(result.success);
//! assert_eq!(result.output, json!(3));
//! # });
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod orchestration;
pub mod resilience;
pub mod runtime;
pub mod state_machine;

pub use config::{EventBusConfig, RuntimeConfig, TaskDefaults};
pub use error::{DefinitionKind, ExecutionFailure, FailureKind, Result, RuntimeError};
pub use events::{Event, EventBus, EventSubscriber, HookPoint, SubscriptionId};
pub use orchestration::{
    BackoffKind, CompensationStrategy, Flow, FlowExecutionResult, FlowOptions, FlowOrchestrator,
    FlowStep, RetryPolicy, SagaCoordinator, SagaDefinition, SagaInstance, SagaResult, SagaStatus,
    SagaStep, SagaStepStatus, TaskDefinition, TaskExecutionOptions, TaskExecutionResult,
    TaskExecutor, TaskHandler,
};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerManager, CircuitState};
pub use runtime::ReactiveRuntime;
pub use state_machine::{ProcessDefinition, ProcessInstance, ProcessManager, Transition};
