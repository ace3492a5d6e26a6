//! # Circuit Breaker Implementation
//!
//! Fault isolation for any asynchronous call, following the classic three
//! state pattern: Closed (normal operation), Open (failing fast) and
//! Half-Open (probing recovery).
//!
//! ## Transitions
//!
//! - Closed → Open after `failure_threshold` consecutive failures. Any
//!   success while closed resets the failure count.
//! - Open → Half-Open when a call arrives at least `reset_timeout` after the
//!   last recorded failure.
//! - Half-Open → Closed after `half_open_success_threshold` consecutive
//!   successes; a single half-open failure reopens the circuit.

use crate::constants::events;
use crate::events::EventBus;
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - calls are allowed through on probation
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open, // Default to safest state
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, the operation was not invoked
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation ran and failed; `state` is the breaker state after recording it
    #[error("Operation failed in {component} (circuit {state}): {error}")]
    OperationFailed {
        component: String,
        state: CircuitState,
        error: E,
    },
}

impl<E> CircuitBreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

#[derive(Debug, Default)]
struct BreakerCounters {
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    last_failure_wallclock: Option<DateTime<Utc>>,
    total_calls: u64,
    total_successes: u64,
    total_failures: u64,
    rejected_calls: u64,
}

enum Admission {
    Allowed(Option<CircuitState>),
    Rejected,
}

/// Circuit breaker guarding one named operation
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    /// Current circuit state, readable without taking the counters lock
    state: AtomicU8,

    config: CircuitBreakerConfig,

    /// State changes happen only while this lock is held
    counters: Mutex<BreakerCounters>,

    event_bus: Option<EventBus>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        let config = config.normalized();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            reset_timeout_ms = config.reset_timeout_ms,
            half_open_success_threshold = config.half_open_success_threshold,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            counters: Mutex::new(BreakerCounters::default()),
            event_bus: None,
        }
    }

    /// Announce state changes on `event_bus`
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.admit().await {
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
            });
        }

        match operation().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(error) => {
                let state = self.record_failure().await;
                Err(CircuitBreakerError::OperationFailed {
                    component: self.name.clone(),
                    state,
                    error,
                })
            }
        }
    }

    /// Like [`call`](Self::call), but `fallback` answers instead of an open
    /// circuit or a failed operation. The failure is still recorded.
    pub async fn call_with_fallback<F, FB, T, E, Fut, FutB>(
        &self,
        operation: F,
        fallback: FB,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce() -> FutB,
        FutB: Future<Output = Result<T, E>>,
    {
        match self.call(operation).await {
            Ok(value) => Ok(value),
            Err(err) => {
                debug!(component = %self.name, error_kind = if err.is_circuit_open() { "circuit_open" } else { "operation_failed" }, "Invoking circuit breaker fallback");
                fallback()
                    .await
                    .map_err(|error| CircuitBreakerError::OperationFailed {
                        component: self.name.clone(),
                        state: self.state(),
                        error,
                    })
            }
        }
    }

    /// Force closed with every counter zeroed
    pub async fn reset(&self) {
        {
            let mut counters = self.counters.lock();
            *counters = BreakerCounters::default();
            self.state.store(CircuitState::Closed as u8, Ordering::Release);
        }
        warn!(component = %self.name, "🚨 Circuit breaker reset");
        self.announce(CircuitState::Closed).await;
    }

    /// Force open, as if a failure had just been recorded
    pub async fn force_open(&self) {
        {
            let mut counters = self.counters.lock();
            counters.success_count = 0;
            counters.last_failure_at = Some(Instant::now());
            counters.last_failure_wallclock = Some(Utc::now());
            self.state.store(CircuitState::Open as u8, Ordering::Release);
        }
        warn!(component = %self.name, "🚨 Circuit breaker forced open");
        self.announce(CircuitState::Open).await;
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let counters = self.counters.lock();
        CircuitBreakerMetrics {
            name: self.name.clone(),
            current_state: self.state(),
            failure_count: counters.failure_count,
            success_count: counters.success_count,
            total_calls: counters.total_calls,
            total_successes: counters.total_successes,
            total_failures: counters.total_failures,
            rejected_calls: counters.rejected_calls,
            last_failure_at: counters.last_failure_wallclock,
        }
    }

    /// Decide whether a call may run, moving Open → Half-Open when due
    async fn admit(&self) -> bool {
        let admission = {
            let mut counters = self.counters.lock();
            match self.state() {
                CircuitState::Closed | CircuitState::HalfOpen => Admission::Allowed(None),
                CircuitState::Open => {
                    let elapsed = counters
                        .last_failure_at
                        .map(|at| at.elapsed() >= self.config.reset_timeout())
                        .unwrap_or(true);
                    if elapsed {
                        counters.success_count = 0;
                        self.state
                            .store(CircuitState::HalfOpen as u8, Ordering::Release);
                        Admission::Allowed(Some(CircuitState::HalfOpen))
                    } else {
                        counters.rejected_calls += 1;
                        Admission::Rejected
                    }
                }
            }
        };

        match admission {
            Admission::Allowed(Some(new_state)) => {
                info!(
                    component = %self.name,
                    half_open_success_threshold = self.config.half_open_success_threshold,
                    "🟡 Circuit breaker half-open (testing recovery)"
                );
                self.announce(new_state).await;
                true
            }
            Admission::Allowed(None) => true,
            Admission::Rejected => {
                debug!(component = %self.name, "Circuit open, rejecting call");
                false
            }
        }
    }

    async fn record_success(&self) {
        let transition = {
            let mut counters = self.counters.lock();
            counters.total_calls += 1;
            counters.total_successes += 1;

            match self.state() {
                CircuitState::Closed => {
                    counters.failure_count = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    counters.success_count += 1;
                    if counters.success_count >= self.config.half_open_success_threshold {
                        counters.failure_count = 0;
                        counters.success_count = 0;
                        self.state.store(CircuitState::Closed as u8, Ordering::Release);
                        Some(CircuitState::Closed)
                    } else {
                        None
                    }
                }
                // Admitted before a concurrent failure reopened the circuit
                CircuitState::Open => None,
            }
        };

        if let Some(new_state) = transition {
            info!(component = %self.name, "🟢 Circuit breaker closed (recovered)");
            self.announce(new_state).await;
        }
    }

    /// Returns the state after recording the failure
    async fn record_failure(&self) -> CircuitState {
        let (state, transition) = {
            let mut counters = self.counters.lock();
            counters.total_calls += 1;
            counters.total_failures += 1;
            counters.last_failure_at = Some(Instant::now());
            counters.last_failure_wallclock = Some(Utc::now());

            let transition = match self.state() {
                CircuitState::Closed => {
                    counters.failure_count += 1;
                    (counters.failure_count >= self.config.failure_threshold)
                        .then_some(CircuitState::Open)
                }
                // Any failure in half-open state immediately reopens the circuit
                CircuitState::HalfOpen => Some(CircuitState::Open),
                CircuitState::Open => None,
            };

            if transition.is_some() {
                counters.success_count = 0;
                self.state.store(CircuitState::Open as u8, Ordering::Release);
            }
            (self.state(), transition.map(|s| (s, counters.failure_count)))
        };

        if let Some((new_state, failure_count)) = transition {
            error!(
                component = %self.name,
                failure_count,
                failure_threshold = self.config.failure_threshold,
                reset_timeout_ms = self.config.reset_timeout_ms,
                "🔴 Circuit breaker opened (failing fast)"
            );
            self.announce(new_state).await;
        } else {
            debug!(component = %self.name, "Operation failed");
        }
        state
    }

    async fn announce(&self, state: CircuitState) {
        let Some(bus) = &self.event_bus else {
            return;
        };
        let event_type = match state {
            CircuitState::Open => events::CIRCUIT_OPENED,
            CircuitState::HalfOpen => events::CIRCUIT_HALF_OPENED,
            CircuitState::Closed => events::CIRCUIT_CLOSED,
        };
        bus.publish(
            event_type,
            json!({ "component": self.name, "state": state }),
        )
        .await;
    }
}
