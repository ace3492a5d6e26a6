//! # Task Executor
//!
//! Runs registered task implementations under a retry policy, a per-attempt
//! timeout and, optionally, a per-task circuit breaker.
//!
//! ## Execution Loop
//!
//! 1. Identity checks: an unknown task id or a missing implementation is
//!    returned as `Err` immediately, never retried.
//! 2. Attempt `0..=max_attempts`: the implementation races a timeout. A
//!    timeout, a returned error, a panic and an open circuit all count as a
//!    failed attempt.
//! 3. Between attempts a `task.retrying` event is published and the executor
//!    sleeps for the policy's backoff delay.
//! 4. Exhausted retries are reported in [`TaskExecutionResult`], not as `Err`.
//!
//! Every call publishes `task.started` followed by exactly one of
//! `task.completed` or `task.failed`.
//!
//! ## Precedence
//!
//! Per-call [`TaskExecutionOptions`] win over the [`TaskDefinition`], which
//! wins over the executor defaults.

use crate::config::TaskDefaults;
use crate::constants::{events, system};
use crate::error::{DefinitionKind, ExecutionFailure, Result, RuntimeError};
use crate::events::EventBus;
use crate::logging::log_task_operation;
use crate::orchestration::retry::RetryPolicy;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerManager};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// A task implementation supplied by the hosting application
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, input: Value) -> anyhow::Result<Value>;
}

/// Adapts an async closure into a [`TaskHandler`]
pub struct FnTaskHandler<F>(F);

impl<F> FnTaskHandler<F> {
    pub fn new(handler: F) -> Self {
        Self(handler)
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnTaskHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn execute(&self, input: Value) -> anyhow::Result<Value> {
        (self.0)(input).await
    }
}

/// Declared task; the implementation is registered separately
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: String,
    pub description: Option<String>,
    pub timeout_ms: Option<u64>,
    pub retry: Option<RetryPolicy>,
    /// Presence enables a `task:<id>` circuit breaker with these thresholds
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl TaskDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }
}

/// Per-call overrides
#[derive(Debug, Clone, Default)]
pub struct TaskExecutionOptions {
    pub retry: Option<RetryPolicy>,
    pub timeout: Option<Duration>,
    /// Force the per-task circuit breaker on or off for this call
    pub circuit_breaker: Option<bool>,
}

impl TaskExecutionOptions {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_circuit_breaker(mut self, enabled: bool) -> Self {
        self.circuit_breaker = Some(enabled);
        self
    }
}

/// Outcome of one `execute_task` call
#[derive(Debug, Clone, Serialize)]
pub struct TaskExecutionResult {
    pub task_id: String,
    /// `Value::Null` when the task failed
    pub output: Value,
    pub success: bool,
    pub error: Option<ExecutionFailure>,
    /// Retries performed after the first attempt
    pub retries: u32,
    pub elapsed: Duration,
}

struct ResolvedExecution {
    policy: RetryPolicy,
    timeout: Duration,
    breaker: Option<Arc<CircuitBreaker>>,
}

/// Registry of task definitions and implementations plus the retry loop
pub struct TaskExecutor {
    definitions: DashMap<String, Arc<TaskDefinition>>,
    implementations: DashMap<String, Arc<dyn TaskHandler>>,
    circuit_breakers: Arc<CircuitBreakerManager>,
    event_bus: EventBus,
    default_retry: RetryPolicy,
    task_defaults: TaskDefaults,
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("definitions", &self.definitions.len())
            .field("implementations", &self.implementations.len())
            .field("default_retry", &self.default_retry)
            .field("task_defaults", &self.task_defaults)
            .finish()
    }
}

impl TaskExecutor {
    pub fn new(event_bus: EventBus, circuit_breakers: Arc<CircuitBreakerManager>) -> Self {
        Self {
            definitions: DashMap::new(),
            implementations: DashMap::new(),
            circuit_breakers,
            event_bus,
            default_retry: RetryPolicy::default(),
            task_defaults: TaskDefaults::default(),
        }
    }

    /// Replace the system-wide retry policy and task defaults
    pub fn with_defaults(mut self, retry: RetryPolicy, task_defaults: TaskDefaults) -> Self {
        self.default_retry = retry;
        self.task_defaults = task_defaults;
        self
    }

    pub fn register_task(&self, definition: TaskDefinition) {
        debug!(task_id = %definition.id, "Registering task definition");
        self.definitions
            .insert(definition.id.clone(), Arc::new(definition));
    }

    pub fn register_task_implementation(
        &self,
        task_id: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) {
        let task_id = task_id.into();
        debug!(task_id = %task_id, "Registering task implementation");
        self.implementations.insert(task_id, handler);
    }

    pub fn register_task_fn<F, Fut>(&self, task_id: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register_task_implementation(task_id, Arc::new(FnTaskHandler::new(handler)));
    }

    pub fn get_task(&self, task_id: &str) -> Result<Arc<TaskDefinition>> {
        self.definitions
            .get(task_id)
            .map(|d| Arc::clone(d.value()))
            .ok_or_else(|| RuntimeError::definition_not_found(DefinitionKind::Task, task_id))
    }

    pub fn has_implementation(&self, task_id: &str) -> bool {
        self.implementations.contains_key(task_id)
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.definitions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.circuit_breakers
    }

    /// Execute a task under its retry, timeout and circuit breaker policy
    #[instrument(skip(self, input, options), fields(task_id = %task_id))]
    pub async fn execute_task(
        &self,
        task_id: &str,
        input: Value,
        options: Option<TaskExecutionOptions>,
    ) -> Result<TaskExecutionResult> {
        let definition = self.get_task(task_id)?;
        let handler = self
            .implementations
            .get(task_id)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| RuntimeError::NoImplementation {
                task_id: task_id.to_string(),
            })?;
        let resolved = self.resolve(&definition, options.unwrap_or_default());

        let started = Instant::now();
        log_task_operation("execute", task_id, Some(0), "started", None);
        self.event_bus
            .publish(
                events::TASK_STARTED,
                json!({ "task_id": task_id, "input": input }),
            )
            .await;

        let mut retries = 0u32;
        loop {
            let outcome = run_attempt(
                task_id,
                &handler,
                input.clone(),
                resolved.timeout,
                resolved.breaker.as_deref(),
            )
            .await;

            let failure = match outcome {
                Ok(output) => {
                    let elapsed = started.elapsed();
                    info!(task_id, retries, elapsed_ms = elapsed.as_millis() as u64, "✅ Task completed");
                    self.event_bus
                        .publish(
                            events::TASK_COMPLETED,
                            json!({
                                "task_id": task_id,
                                "output": output,
                                "retries": retries,
                                "elapsed_ms": elapsed.as_millis() as u64,
                            }),
                        )
                        .await;
                    return Ok(TaskExecutionResult {
                        task_id: task_id.to_string(),
                        output,
                        success: true,
                        error: None,
                        retries,
                        elapsed,
                    });
                }
                Err(failure) => failure,
            };

            if retries >= resolved.policy.max_attempts || !resolved.policy.should_retry(&failure) {
                let elapsed = started.elapsed();
                warn!(task_id, retries, error = %failure, "❌ Task failed");
                log_task_operation("execute", task_id, Some(retries), "failed", Some(&failure.message));
                self.event_bus
                    .publish(
                        events::TASK_FAILED,
                        json!({
                            "task_id": task_id,
                            "error": failure,
                            "retries": retries,
                            "elapsed_ms": elapsed.as_millis() as u64,
                        }),
                    )
                    .await;
                return Ok(TaskExecutionResult {
                    task_id: task_id.to_string(),
                    output: Value::Null,
                    success: false,
                    error: Some(failure),
                    retries,
                    elapsed,
                });
            }

            retries += 1;
            let delay = resolved.policy.backoff_delay(retries);
            warn!(
                task_id,
                attempt = retries,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "🔄 Retrying task"
            );
            self.event_bus
                .publish(
                    events::TASK_RETRYING,
                    json!({
                        "task_id": task_id,
                        "attempt": retries,
                        "delay_ms": delay.as_millis() as u64,
                        "error": failure,
                    }),
                )
                .await;
            tokio::time::sleep(delay).await;
        }
    }

    fn resolve(&self, definition: &TaskDefinition, options: TaskExecutionOptions) -> ResolvedExecution {
        let policy = options
            .retry
            .or_else(|| definition.retry.clone())
            .unwrap_or_else(|| self.default_retry.clone());

        let timeout = options
            .timeout
            .or_else(|| definition.timeout_ms.map(Duration::from_millis))
            .unwrap_or_else(|| self.task_defaults.timeout());

        let breaker_enabled = options.circuit_breaker.unwrap_or(
            definition.circuit_breaker.is_some() || self.task_defaults.circuit_breaker_enabled,
        );
        let breaker = breaker_enabled.then(|| {
            let name = format!("{}{}", system::TASK_BREAKER_PREFIX, definition.id);
            match &definition.circuit_breaker {
                Some(config) => self.circuit_breakers.get_or_create_with(&name, config),
                None => self.circuit_breakers.get_or_create(&name),
            }
        });

        ResolvedExecution {
            policy,
            timeout,
            breaker,
        }
    }
}

/// One attempt: panics and timeouts become failures like returned errors
async fn run_attempt(
    task_id: &str,
    handler: &Arc<dyn TaskHandler>,
    input: Value,
    timeout: Duration,
    breaker: Option<&CircuitBreaker>,
) -> std::result::Result<Value, ExecutionFailure> {
    let execution_failure = |reason: String| {
        ExecutionFailure::from(&RuntimeError::TaskExecution {
            task_id: task_id.to_string(),
            reason,
        })
    };
    let invoke = move || async move {
        let guarded = AssertUnwindSafe(handler.execute(input)).catch_unwind();
        match tokio::time::timeout(timeout, guarded).await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(error))) => Err(execution_failure(format!("{error:#}"))),
            Ok(Err(_)) => Err(execution_failure("task implementation panicked".to_string())),
            // The abandoned attempt is dropped here and its result discarded
            Err(_) => Err(ExecutionFailure::from(&RuntimeError::Timeout {
                task_id: task_id.to_string(),
                timeout,
            })),
        }
    };

    match breaker {
        None => invoke().await,
        Some(breaker) => breaker.call(invoke).await.map_err(|err| match err {
            CircuitBreakerError::CircuitOpen { component } => {
                ExecutionFailure::from(&RuntimeError::CircuitOpen { component })
            }
            CircuitBreakerError::OperationFailed { error, .. } => error,
        }),
    }
}
