//! # Circuit Breaker Metrics
//!
//! Point-in-time snapshots of breaker counters for monitoring.

use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot of a single circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub current_state: CircuitState,

    /// Consecutive failures counted toward opening
    pub failure_count: u32,

    /// Consecutive half-open successes; always 0 outside half-open
    pub success_count: u32,

    pub total_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,

    /// Calls turned away while open
    pub rejected_calls: u64,

    pub last_failure_at: Option<DateTime<Utc>>,
}

impl CircuitBreakerMetrics {
    /// Failure rate over all executed calls (0.0 to 1.0)
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.total_failures as f64 / self.total_calls as f64
    }

    /// Get human-readable state description
    pub fn state_description(&self) -> &'static str {
        match self.current_state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all calls",
            CircuitState::HalfOpen => "Recovering - Testing system health",
        }
    }

    /// Format metrics for logging
    pub fn format_summary(&self) -> String {
        format!(
            "{}: {} | Calls: {} | Failures: {} ({:.1}%) | Rejected: {}",
            self.name,
            self.state_description(),
            self.total_calls,
            self.total_failures,
            self.failure_rate() * 100.0,
            self.rejected_calls
        )
    }
}

/// Metrics of every breaker held by a manager
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemCircuitBreakerMetrics {
    pub circuit_breakers: HashMap<String, CircuitBreakerMetrics>,
    pub collected_at: Option<DateTime<Utc>>,
}

impl SystemCircuitBreakerMetrics {
    pub fn open_circuits(&self) -> Vec<&str> {
        self.circuit_breakers
            .values()
            .filter(|m| m.current_state == CircuitState::Open)
            .map(|m| m.name.as_str())
            .collect()
    }
}
