use procflow_core::{BackoffKind, RetryPolicy};
use proptest::prelude::*;
use std::time::Duration;

/// Strategy for backoff kinds
pub fn backoff_kind_strategy() -> impl Strategy<Value = BackoffKind> {
    prop_oneof![
        Just(BackoffKind::Fixed),
        Just(BackoffKind::Linear),
        Just(BackoffKind::Exponential),
    ]
}

/// Strategy for exponential policies with bounded, realistic parameters
pub fn exponential_policy_strategy() -> impl Strategy<Value = RetryPolicy> {
    (
        0u32..10,                             // max_attempts
        1u64..5_000,                          // initial_delay_ms
        prop_oneof![Just(1.5), Just(2.0), Just(3.0)],
        prop::option::of(1_000u64..120_000),  // max_delay_ms
    )
        .prop_map(|(max_attempts, initial, factor, max_delay)| {
            let policy =
                RetryPolicy::exponential(max_attempts, Duration::from_millis(initial), factor);
            match max_delay {
                Some(ms) => policy.with_max_delay(Duration::from_millis(ms)),
                None => policy,
            }
        })
}

/// Strategy for `(max_attempts, failures_before_success)` with failures < attempts
pub fn attempts_and_failures_strategy() -> impl Strategy<Value = (u32, u32)> {
    (1u32..6).prop_flat_map(|max_attempts| (Just(max_attempts), 0..max_attempts))
}
