//! # Circuit Breaker Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Thresholds for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in the closed state before opening
    pub failure_threshold: u32,

    /// Time since the last failure before an open circuit admits a probe
    pub reset_timeout_ms: u64,

    /// Consecutive half-open successes needed to close again
    pub half_open_success_threshold: u32,
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, reset_timeout: Duration, half_open_success_threshold: u32) -> Self {
        Self {
            failure_threshold,
            reset_timeout_ms: reset_timeout.as_millis() as u64,
            half_open_success_threshold,
        }
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    /// Thresholds of 0 behave exactly like 1: the first failure trips the
    /// circuit and the first half-open success closes it.
    pub fn normalized(&self) -> Self {
        Self {
            failure_threshold: self.failure_threshold.max(1),
            reset_timeout_ms: self.reset_timeout_ms,
            half_open_success_threshold: self.half_open_success_threshold.max(1),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            half_open_success_threshold: 2,
        }
    }
}
