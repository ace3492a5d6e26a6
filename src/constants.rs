//! # Runtime Constants
//!
//! Event names published on the bus and other system-wide markers.

/// Lifecycle event names published by the runtime components
pub mod events {
    // Bus
    pub const SYSTEM_ERROR: &str = "system.error";

    // Process lifecycle events
    pub const PROCESS_CREATED: &str = "process.created";
    pub const PROCESS_STATE_CHANGED: &str = "process.state_changed";
    pub const PROCESS_TRANSITION_REQUESTED: &str = "process.transition.requested";

    // Task lifecycle events
    pub const TASK_STARTED: &str = "task.started";
    pub const TASK_RETRYING: &str = "task.retrying";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";

    // Flow lifecycle events
    pub const FLOW_STARTED: &str = "flow.started";
    pub const FLOW_COMPLETED: &str = "flow.completed";
    pub const FLOW_FAILED: &str = "flow.failed";
    pub const FLOW_STEP_STARTED: &str = "flow.step.started";
    pub const FLOW_STEP_COMPLETED: &str = "flow.step.completed";
    pub const FLOW_STEP_FAILED: &str = "flow.step.failed";

    // Circuit breaker events
    pub const CIRCUIT_OPENED: &str = "circuit.opened";
    pub const CIRCUIT_HALF_OPENED: &str = "circuit.half_opened";
    pub const CIRCUIT_CLOSED: &str = "circuit.closed";

    // Saga lifecycle events
    pub const SAGA_STARTED: &str = "saga.started";
    pub const SAGA_STEP_COMPLETED: &str = "saga.step.completed";
    pub const SAGA_STEP_FAILED: &str = "saga.step.failed";
    pub const SAGA_COMPENSATING: &str = "saga.compensating";
    pub const SAGA_STEP_COMPENSATED: &str = "saga.step.compensated";
    pub const SAGA_COMPENSATION_FAILED: &str = "saga.compensation.failed";
    pub const SAGA_COMPLETED: &str = "saga.completed";
    pub const SAGA_FAILED: &str = "saga.failed";
}

/// System-wide markers
pub mod system {
    /// Matches every event type on the bus and every state in a transition
    pub const WILDCARD: &str = "*";

    /// Prefix used when naming per-task circuit breakers
    pub const TASK_BREAKER_PREFIX: &str = "task:";

    pub const PROCFLOW_CORE_VERSION: &str = env!("CARGO_PKG_VERSION");
}
