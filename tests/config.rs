//! Configuration loading: file layers and environment overrides

use procflow_core::{BackoffKind, ReactiveRuntime, RuntimeConfig, RuntimeError};
use std::io::Write;
use std::time::Duration;

#[test]
fn config_defaults_describe_the_runtime_baseline() {
    let config = RuntimeConfig::default();

    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.retry.backoff, BackoffKind::Exponential);
    assert_eq!(config.retry.initial_delay(), Duration::from_secs(1));
    assert_eq!(config.retry.max_delay(), Some(Duration::from_secs(60)));
    assert_eq!(config.circuit_breaker.failure_threshold, 5);
    assert_eq!(config.task.timeout(), Duration::from_secs(30));
    assert!(!config.task.circuit_breaker_enabled);
}

// Environment variables are process-wide, so every env-driven assertion
// lives in this one test.
#[test]
fn config_environment_overrides_file_and_defaults() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        "[retry]\nmax_attempts = 6\ninitial_delay_ms = 250\n\n[task]\ntimeout_ms = 5000"
    )
    .unwrap();

    std::env::set_var("PROCFLOW__RETRY__MAX_ATTEMPTS", "9");
    std::env::set_var("PROCFLOW__FLOW__CONTINUE_ON_ERROR", "true");

    let from_file = RuntimeConfig::load(Some(file.path()));
    let from_env = RuntimeConfig::from_env();

    std::env::remove_var("PROCFLOW__RETRY__MAX_ATTEMPTS");
    std::env::remove_var("PROCFLOW__FLOW__CONTINUE_ON_ERROR");

    let from_file = from_file.unwrap();
    assert_eq!(from_file.retry.max_attempts, 9);
    assert_eq!(from_file.retry.initial_delay_ms, 250);
    assert_eq!(from_file.task.timeout_ms, 5000);
    assert!(from_file.flow.continue_on_error);

    let from_env = from_env.unwrap();
    assert_eq!(from_env.retry.max_attempts, 9);
    assert_eq!(from_env.task.timeout_ms, 30_000);
}

#[test]
fn config_invalid_file_values_are_rejected() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[flow]\nmax_parallel_executions = 0").unwrap();

    let err = RuntimeConfig::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, RuntimeError::Configuration(_)));
}

#[test]
fn config_loaded_values_reach_the_runtime() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[circuit_breaker]\nfailure_threshold = 2").unwrap();

    let config = RuntimeConfig::load(Some(file.path())).unwrap();
    let runtime = ReactiveRuntime::new(config).unwrap();

    assert_eq!(runtime.config().circuit_breaker.failure_threshold, 2);
    assert_eq!(runtime.circuit_breaker("payments").config().failure_threshold, 2);
}
