//! Task execution: retries, backoff timing, timeouts and lifecycle events

mod common;

use common::*;
use procflow_core::constants::events;
use procflow_core::{
    BackoffKind, FailureKind, ReactiveRuntime, RetryPolicy, RuntimeConfig, RuntimeError,
    TaskDefinition, TaskExecutionOptions,
};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_exponential_backoff_observed_delays() {
    init_test_logging();
    let runtime = ReactiveRuntime::default();
    let retrying = EventRecorder::attach(runtime.event_bus(), events::TASK_RETRYING);
    let calls = register_flaky_task(
        &runtime,
        "fetch_quote",
        RetryPolicy::exponential(2, Duration::from_millis(100), 2.0),
        2,
    );

    let started = Instant::now();
    let result = runtime
        .execute_task("fetch_quote", json!({ "symbol": "ACME" }), None)
        .await
        .unwrap();
    let waited = started.elapsed();

    assert!(result.success);
    assert_eq!(result.retries, 2);
    assert_eq!(result.output, json!({ "symbol": "ACME" }));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let delays: Vec<Value> = retrying
        .of_type(events::TASK_RETRYING)
        .iter()
        .map(|e| e.payload["delay_ms"].clone())
        .collect();
    assert_eq!(delays, vec![json!(100), json!(200)]);
    assert!(waited >= Duration::from_millis(300));
    assert!(waited < Duration::from_millis(350));
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_events_in_order() {
    let runtime = ReactiveRuntime::default();
    let recorder = EventRecorder::attach(runtime.event_bus(), "task.*");
    register_flaky_task(&runtime, "flaky", RetryPolicy::fixed(1, Duration::from_millis(5)), 1);

    runtime.execute_task("flaky", json!({}), None).await.unwrap();

    assert_eq!(
        recorder.event_types(),
        vec![events::TASK_STARTED, events::TASK_RETRYING, events::TASK_COMPLETED]
    );
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_publish_failure() {
    let runtime = ReactiveRuntime::default();
    let recorder = EventRecorder::attach(runtime.event_bus(), "task.*");
    register_flaky_task(&runtime, "doomed", RetryPolicy::linear(3, Duration::from_millis(10)), u32::MAX);

    let result = runtime.execute_task("doomed", json!({}), None).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.retries, 3);
    let error = result.error.unwrap();
    assert_eq!(error.kind, FailureKind::Execution);
    assert!(error.message.contains("transient failure #4"));
    assert_eq!(recorder.event_types().last().unwrap(), events::TASK_FAILED);
    assert_eq!(recorder.of_type(events::TASK_RETRYING).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_from_definition_is_retried() {
    let runtime = ReactiveRuntime::default();
    runtime.register_task(
        TaskDefinition::new("slow")
            .with_timeout(Duration::from_millis(20))
            .with_retry(RetryPolicy::fixed(1, Duration::from_millis(5))),
    );
    runtime.register_task_fn("slow", |_| async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok(Value::Null)
    });

    let result = runtime.execute_task("slow", Value::Null, None).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.retries, 1);
    assert!(result.error.unwrap().is_timeout());
}

#[tokio::test(start_paused = true)]
async fn test_call_options_override_definition() {
    let runtime = ReactiveRuntime::default();
    let calls = register_flaky_task(&runtime, "override", RetryPolicy::none(), 1);

    let options = TaskExecutionOptions::default()
        .with_retry(RetryPolicy::fixed(1, Duration::from_millis(1)));
    let result = runtime
        .execute_task("override", json!(1), Some(options))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.retries, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_configured_default_policy_applies() {
    let mut config = RuntimeConfig::default();
    config.retry.max_attempts = 1;
    config.retry.backoff = BackoffKind::Fixed;
    config.retry.initial_delay_ms = 10;
    let runtime = ReactiveRuntime::new(config).unwrap();

    runtime.register_task(TaskDefinition::new("uses_defaults"));
    runtime.register_task_fn("uses_defaults", |_| async {
        Err::<Value, _>(anyhow::anyhow!("always"))
    });

    let result = runtime.execute_task("uses_defaults", Value::Null, None).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.retries, 1);
}

#[tokio::test]
async fn test_existence_checks_are_not_retried() {
    let runtime = ReactiveRuntime::default();
    let recorder = EventRecorder::attach(runtime.event_bus(), "*");

    let err = runtime.execute_task("ghost", Value::Null, None).await.unwrap_err();
    assert!(err.is_identity_error());

    runtime.register_task(TaskDefinition::new("declared_only"));
    let err = runtime.execute_task("declared_only", Value::Null, None).await.unwrap_err();
    assert!(matches!(err, RuntimeError::NoImplementation { .. }));

    assert!(recorder.event_types().is_empty());
}
