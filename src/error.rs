//! # Runtime Errors
//!
//! Error taxonomy shared by every component of the runtime.
//!
//! Identity errors (unknown ids) are always returned immediately as `Err`.
//! Operational failures that a policy can absorb (retries, fallbacks,
//! compensation) are captured as [`ExecutionFailure`] records inside the
//! result objects instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Kinds of definitions held by the runtime registries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    Process,
    Task,
    Flow,
    Saga,
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process => write!(f, "process"),
            Self::Task => write!(f, "task"),
            Self::Flow => write!(f, "flow"),
            Self::Saga => write!(f, "saga"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Unknown process/task/flow/saga definition id
    #[error("{kind} definition not found: {id}")]
    DefinitionNotFound { kind: DefinitionKind, id: String },

    /// Unknown live instance id
    #[error("{kind} instance not found: {id}")]
    InstanceNotFound { kind: DefinitionKind, id: Uuid },

    /// Task is defined but nothing has been registered to run it
    #[error("No implementation registered for task: {task_id}")]
    NoImplementation { task_id: String },

    #[error("Task execution failed for {task_id}: {reason}")]
    TaskExecution { task_id: String, reason: String },

    #[error("Task {task_id} timed out after {timeout:?}")]
    Timeout { task_id: String, timeout: Duration },

    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    #[error("Flow step {step_id} failed: {reason}")]
    StepFailure { step_id: String, reason: String },

    #[error("Compensation failed for saga step {step}: {reason}")]
    Compensation { step: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation not permitted in the entity's current lifecycle state
    #[error("{entity} {id} is in an invalid state: {reason}")]
    InvalidState {
        entity: &'static str,
        id: Uuid,
        reason: String,
    },

    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),
}

impl RuntimeError {
    pub fn definition_not_found(kind: DefinitionKind, id: impl Into<String>) -> Self {
        Self::DefinitionNotFound {
            kind,
            id: id.into(),
        }
    }

    /// Identity errors are surfaced synchronously and never retried
    pub fn is_identity_error(&self) -> bool {
        matches!(
            self,
            Self::DefinitionNotFound { .. }
                | Self::InstanceNotFound { .. }
                | Self::NoImplementation { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Category of a captured failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Execution,
    Timeout,
    CircuitOpen,
    StepFailure,
    Configuration,
    Compensation,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Execution => write!(f, "execution"),
            Self::Timeout => write!(f, "timeout"),
            Self::CircuitOpen => write!(f, "circuit_open"),
            Self::StepFailure => write!(f, "step_failure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Compensation => write!(f, "compensation"),
        }
    }
}

/// Clonable failure record carried inside execution results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ExecutionFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Execution, message)
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == FailureKind::Timeout
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<&RuntimeError> for ExecutionFailure {
    fn from(err: &RuntimeError) -> Self {
        let kind = match err {
            RuntimeError::Timeout { .. } => FailureKind::Timeout,
            RuntimeError::CircuitOpen { .. } => FailureKind::CircuitOpen,
            RuntimeError::StepFailure { .. } => FailureKind::StepFailure,
            RuntimeError::Configuration(_) | RuntimeError::ConfigLoad(_) => {
                FailureKind::Configuration
            }
            RuntimeError::Compensation { .. } => FailureKind::Compensation,
            _ => FailureKind::Execution,
        };
        Self::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_errors() {
        assert!(RuntimeError::definition_not_found(DefinitionKind::Task, "t").is_identity_error());
        assert!(RuntimeError::NoImplementation {
            task_id: "t".to_string()
        }
        .is_identity_error());
        assert!(!RuntimeError::Configuration("bad".to_string()).is_identity_error());
    }

    #[test]
    fn test_failure_from_runtime_error() {
        let err = RuntimeError::Timeout {
            task_id: "fetch".to_string(),
            timeout: Duration::from_millis(50),
        };
        let failure = ExecutionFailure::from(&err);
        assert!(failure.is_timeout());
        assert!(failure.message.contains("fetch"));
    }
}
