//! # Retry Policy
//!
//! Backoff calculation for task retries.
//!
//! For retry number `n` (the delay slept before attempt `n`, 1-based):
//!
//! - **Fixed**: `initial_delay`
//! - **Linear**: `initial_delay × n`
//! - **Exponential**: `initial_delay × factor^(n-1)`
//!
//! Every kind is capped at `max_delay` when one is set. Jitter, when
//! enabled, adds up to 10% on top and still respects the cap.

use crate::error::ExecutionFailure;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_FACTOR: f64 = 2.0;
const MAX_JITTER: f64 = 0.1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Linear,
    #[default]
    Exponential,
}

/// Decides whether a failed attempt is worth retrying
#[derive(Clone)]
pub struct RetryPredicate(Arc<dyn Fn(&ExecutionFailure) -> bool + Send + Sync>);

impl RetryPredicate {
    pub fn new(predicate: impl Fn(&ExecutionFailure) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    pub fn should_retry(&self, failure: &ExecutionFailure) -> bool {
        (self.0)(failure)
    }
}

impl fmt::Debug for RetryPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RetryPredicate(<fn>)")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub initial_delay_ms: u64,
    /// Exponential growth factor, 2.0 when unset
    pub factor: Option<f64>,
    pub max_delay_ms: Option<u64>,
    pub jitter: bool,
    /// Only consulted for failures; `None` retries everything
    #[serde(skip)]
    pub retry_if: Option<RetryPredicate>,
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: BackoffKind::Fixed,
            initial_delay_ms: delay.as_millis() as u64,
            factor: None,
            max_delay_ms: None,
            jitter: false,
            retry_if: None,
        }
    }

    pub fn linear(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            backoff: BackoffKind::Linear,
            ..Self::fixed(max_attempts, initial_delay)
        }
    }

    pub fn exponential(max_attempts: u32, initial_delay: Duration, factor: f64) -> Self {
        Self {
            backoff: BackoffKind::Exponential,
            factor: Some(factor),
            ..Self::fixed(max_attempts, initial_delay)
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay_ms = Some(max_delay.as_millis() as u64);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retry_if(
        mut self,
        predicate: impl Fn(&ExecutionFailure) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_if = Some(RetryPredicate::new(predicate));
        self
    }

    pub fn factor(&self) -> f64 {
        self.factor.unwrap_or(DEFAULT_FACTOR)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay_ms.map(Duration::from_millis)
    }

    /// Deterministic delay slept before retry `attempt_number` (1-based)
    pub fn delay_for_attempt(&self, attempt_number: u32) -> Duration {
        if attempt_number == 0 {
            return Duration::ZERO;
        }

        let initial = self.initial_delay_ms as f64;
        let millis = match self.backoff {
            BackoffKind::Fixed => initial,
            BackoffKind::Linear => initial * f64::from(attempt_number),
            BackoffKind::Exponential => {
                initial * self.factor().powi(attempt_number.saturating_sub(1) as i32)
            }
        };

        self.clamp(millis)
    }

    /// Delay actually slept, including jitter when enabled
    pub fn backoff_delay(&self, attempt_number: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt_number);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let jittered = delay.as_millis() as f64 * (1.0 + fastrand::f64() * MAX_JITTER);
        self.clamp(jittered)
    }

    pub fn should_retry(&self, failure: &ExecutionFailure) -> bool {
        self.retry_if
            .as_ref()
            .map(|p| p.should_retry(failure))
            .unwrap_or(true)
    }

    fn clamp(&self, millis: f64) -> Duration {
        let mut millis = if millis.is_finite() && millis > 0.0 {
            millis
        } else if millis.is_infinite() {
            u64::MAX as f64
        } else {
            0.0
        };
        if let Some(max) = self.max_delay_ms {
            millis = millis.min(max as f64);
        }
        Duration::from_millis(millis.min(u64::MAX as f64).round() as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffKind::Exponential,
            initial_delay_ms: 1000,
            factor: Some(DEFAULT_FACTOR),
            max_delay_ms: Some(60_000),
            jitter: false,
            retry_if: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(250));
    }

    #[test]
    fn test_linear_delay() {
        let policy = RetryPolicy::linear(3, Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn test_exponential_delay_with_cap() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(100), 2.0)
            .with_max_delay(Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500));
    }

    #[test]
    fn test_huge_exponent_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::exponential(2000, Duration::from_millis(1000), 10.0);
        assert!(policy.delay_for_attempt(1000) > Duration::from_secs(1_000_000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::fixed(1, Duration::from_millis(1000)).with_jitter(true);
        for _ in 0..50 {
            let delay = policy.backoff_delay(1);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1100));
        }
    }

    #[test]
    fn test_retry_predicate() {
        let policy = RetryPolicy::default().with_retry_if(|failure| !failure.is_timeout());
        assert!(policy.should_retry(&ExecutionFailure::execution("flaky")));
        assert!(!policy.should_retry(&ExecutionFailure::new(FailureKind::Timeout, "slow")));
    }
}
