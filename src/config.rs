//! # Runtime Configuration
//!
//! System-wide defaults for every policy surface. Each value can still be
//! overridden per call (`TaskExecutionOptions`, `FlowOptions`).
//!
//! ## Loading
//!
//! Layers are applied in order, later layers winning:
//!
//! 1. Built-in defaults
//! 2. An optional configuration file (any format the `config` crate reads)
//! 3. Environment variables, `PROCFLOW__<SECTION>__<KEY>`
//!
//! ```rust,no_run
//! use procflow_core::config::RuntimeConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RuntimeConfig::load(Some(Path::new("procflow.toml")))?;
//! println!("retry attempts: {}", config.retry.max_attempts);
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, RuntimeError};
use crate::orchestration::flow_orchestrator::FlowOptions;
use crate::orchestration::retry::{BackoffKind, RetryPolicy};
use crate::resilience::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const ENV_PREFIX: &str = "PROCFLOW";
const ENV_SEPARATOR: &str = "__";

/// Root configuration for a runtime instance
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Default retry policy for tasks without their own
    pub retry: RetryPolicy,

    /// Default flow execution options
    pub flow: FlowOptions,

    /// Default circuit breaker thresholds
    pub circuit_breaker: CircuitBreakerConfig,

    /// Task execution defaults
    pub task: TaskDefaults,

    /// Event bus settings
    pub events: EventBusConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskDefaults {
    /// Per-attempt timeout applied when neither the call nor the task sets one
    pub timeout_ms: u64,

    /// Route task attempts through a per-task circuit breaker
    pub circuit_breaker_enabled: bool,
}

impl TaskDefaults {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            circuit_breaker_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Per-receiver buffer of the broadcast channel
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    /// Load defaults, then the optional file, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            ::config::Config::builder().add_source(::config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading runtime configuration file");
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        let config: Self = builder
            .add_source(Self::environment_source())
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides only
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    fn environment_source() -> ::config::Environment {
        ::config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
    }

    /// Reject values no policy can work with
    pub fn validate(&self) -> Result<()> {
        if self.events.channel_capacity == 0 {
            return Err(RuntimeError::Configuration(
                "events.channel_capacity must be greater than 0".to_string(),
            ));
        }

        if self.task.timeout_ms == 0 {
            return Err(RuntimeError::Configuration(
                "task.timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.flow.max_parallel_executions == 0 {
            return Err(RuntimeError::Configuration(
                "flow.max_parallel_executions must be greater than 0".to_string(),
            ));
        }

        if self.retry.backoff == BackoffKind::Exponential && self.retry.factor() < 1.0 {
            return Err(RuntimeError::Configuration(format!(
                "retry.factor must be at least 1.0 for exponential backoff, got {}",
                self.retry.factor()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.flow.max_parallel_executions, 10);
        assert!(!config.flow.continue_on_error);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.task.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let mut config = RuntimeConfig::default();
        config.events.channel_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(RuntimeError::Configuration(_))
        ));
    }

    #[test]
    fn test_validation_rejects_shrinking_exponential_factor() {
        let mut config = RuntimeConfig::default();
        config.retry.factor = Some(0.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[retry]\nmax_attempts = 7\nbackoff = \"linear\"\n\n[flow]\ncontinue_on_error = true"
        )
        .unwrap();

        let config = RuntimeConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.backoff, BackoffKind::Linear);
        assert!(config.flow.continue_on_error);
        // Untouched sections keep their defaults
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        let result = RuntimeConfig::load(Some(Path::new("/nonexistent/procflow.toml")));
        assert!(matches!(result, Err(RuntimeError::ConfigLoad(_))));
    }
}
