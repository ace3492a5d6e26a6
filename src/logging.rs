//! # Structured Logging Module
//!
//! Environment-aware structured logging for debugging concurrent flows,
//! retries and saga compensation.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
///
/// `RUST_LOG` wins over the environment-derived level. Set
/// `PROCFLOW_LOG_FORMAT=json` for machine-readable output.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));

        let layer = if json_output_requested() {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // Use try_init to avoid panic if global subscriber already set
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("PROCFLOW_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn json_output_requested() -> bool {
    std::env::var("PROCFLOW_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for task operations
pub fn log_task_operation(
    operation: &str,
    task_id: &str,
    attempt: Option<u32>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        task_id = %task_id,
        attempt = attempt,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 TASK_OPERATION"
    );
}

/// Log structured data for flow operations
pub fn log_flow_operation(
    operation: &str,
    flow_id: &str,
    step_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        flow_id = %flow_id,
        step_id = step_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔀 FLOW_OPERATION"
    );
}

/// Log structured data for saga operations
pub fn log_saga_operation(
    operation: &str,
    saga_id: &str,
    instance_id: &str,
    step: Option<&str>,
    status: &str,
) {
    tracing::info!(
        operation = %operation,
        saga_id = %saga_id,
        instance_id = %instance_id,
        step = step,
        status = %status,
        timestamp = %Utc::now().to_rfc3339(),
        "🧾 SAGA_OPERATION"
    );
}

/// Log structured data for process state machine operations
pub fn log_process_operation(
    operation: &str,
    process_id: &str,
    instance_id: &str,
    from_state: Option<&str>,
    to_state: &str,
) {
    tracing::info!(
        operation = %operation,
        process_id = %process_id,
        instance_id = %instance_id,
        from_state = from_state,
        to_state = %to_state,
        timestamp = %Utc::now().to_rfc3339(),
        "🔁 PROCESS_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        log_task_operation("execute", "noop", Some(0), "completed", None);
    }
}
