//! Circuit breaker state machine through the runtime registry

mod common;

use common::*;
use procflow_core::constants::events;
use procflow_core::resilience::CircuitBreakerError;
use procflow_core::{CircuitBreakerConfig, CircuitState, ReactiveRuntime};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn runtime() -> ReactiveRuntime {
    ReactiveRuntime::default()
}

fn config(failure_threshold: u32, reset: Duration, success_threshold: u32) -> CircuitBreakerConfig {
    CircuitBreakerConfig::new(failure_threshold, reset, success_threshold)
}

#[tokio::test]
async fn test_opens_after_threshold_and_rejects_without_invoking() {
    init_test_logging();
    let runtime = runtime();
    let breaker = runtime
        .circuit_breakers()
        .get_or_create_with("payments", &config(3, Duration::from_secs(30), 2));
    let invocations = Arc::new(AtomicU32::new(0));

    for _ in 0..3 {
        let counter = Arc::clone(&invocations);
        let result = breaker
            .call(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("gateway down")
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::OperationFailed { .. })));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let counter = Arc::clone(&invocations);
    let rejected = breaker
        .call(|| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), &str>(())
        })
        .await;

    assert!(rejected.unwrap_err().is_circuit_open());
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
    assert_eq!(breaker.metrics().rejected_calls, 1);
}

#[tokio::test]
async fn test_success_resets_failure_count() {
    let runtime = runtime();
    let breaker = runtime
        .circuit_breakers()
        .get_or_create_with("search", &config(3, Duration::from_secs(30), 1));

    for _ in 0..2 {
        let _ = breaker.call(|| async { Err::<(), _>("miss") }).await;
    }
    breaker.call(|| async { Ok::<_, &str>(()) }).await.unwrap();
    assert_eq!(breaker.metrics().failure_count, 0);

    for _ in 0..2 {
        let _ = breaker.call(|| async { Err::<(), _>("miss") }).await;
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_recovery_and_relapse() {
    let runtime = runtime();
    let transitions = EventRecorder::attach(runtime.event_bus(), "circuit.*");
    let breaker = runtime
        .circuit_breakers()
        .get_or_create_with("inventory", &config(1, Duration::from_millis(500), 2));

    let _ = breaker.call(|| async { Err::<(), _>("down") }).await;
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_millis(499)).await;
    assert!(breaker
        .call(|| async { Ok::<_, &str>(()) })
        .await
        .unwrap_err()
        .is_circuit_open());

    tokio::time::advance(Duration::from_millis(1)).await;
    breaker.call(|| async { Ok::<_, &str>(()) }).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    // A single half-open failure reopens
    let _ = breaker.call(|| async { Err::<(), _>("still down") }).await;
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_millis(500)).await;
    breaker.call(|| async { Ok::<_, &str>(()) }).await.unwrap();
    breaker.call(|| async { Ok::<_, &str>(()) }).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.metrics().failure_count, 0);

    assert_eq!(
        transitions.event_types(),
        vec![
            events::CIRCUIT_OPENED,
            events::CIRCUIT_HALF_OPENED,
            events::CIRCUIT_OPENED,
            events::CIRCUIT_HALF_OPENED,
            events::CIRCUIT_CLOSED,
        ]
    );
}

#[tokio::test]
async fn test_reset_and_fallback() {
    let runtime = runtime();
    let breaker = runtime
        .circuit_breakers()
        .get_or_create_with("recommendations", &config(1, Duration::from_secs(60), 1));
    let _ = breaker.call(|| async { Err::<Vec<&str>, _>("timeout") }).await;

    let fallback = breaker
        .call_with_fallback(
            || async { Ok::<_, &str>(vec!["personalized"]) },
            || async { Ok(vec!["bestsellers"]) },
        )
        .await
        .unwrap();
    assert_eq!(fallback, vec!["bestsellers"]);

    breaker.reset().await;
    assert_eq!(breaker.state(), CircuitState::Closed);
    let fresh = breaker
        .call(|| async { Ok::<_, &str>(vec!["personalized"]) })
        .await
        .unwrap();
    assert_eq!(fresh, vec!["personalized"]);
}

#[tokio::test]
async fn test_task_breaker_is_registered_under_task_prefix() {
    let runtime = runtime();
    register_flaky_task(&runtime, "ship", procflow_core::RetryPolicy::none(), u32::MAX);

    let options = procflow_core::TaskExecutionOptions::default().with_circuit_breaker(true);
    runtime
        .execute_task("ship", serde_json::Value::Null, Some(options))
        .await
        .unwrap();

    let metrics = runtime.circuit_breakers().system_metrics();
    let breaker = &metrics.circuit_breakers["task:ship"];
    assert_eq!(breaker.total_failures, 1);
    assert_eq!(breaker.current_state, CircuitState::Closed);
}
