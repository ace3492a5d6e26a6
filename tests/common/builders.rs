//! Builders for runtimes, recording subscribers and scripted tasks

use parking_lot::Mutex;
use procflow_core::{Event, EventBus, ReactiveRuntime, RetryPolicy, TaskDefinition};
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Records every event matching a pattern, in delivery order
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus, pattern: &str) -> Self {
        let recorder = Self::default();
        let sink = recorder.clone();
        bus.subscribe_fn(pattern, move |event| {
            let sink = sink.clone();
            async move {
                sink.record(&event);
                Ok(())
            }
        });
        recorder
    }

    pub fn record(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }

    pub fn of_type(&self, event_type: &str) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

/// Shared, ordered log of task invocations
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn record(&self, name: &str) {
        self.calls.lock().push(name.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

/// Register a task that fails `failures` times, then echoes its input.
/// Returns the invocation counter.
pub fn register_flaky_task(
    runtime: &ReactiveRuntime,
    task_id: &str,
    retry: RetryPolicy,
    failures: u32,
) -> Arc<AtomicU32> {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    runtime.register_task(TaskDefinition::new(task_id).with_retry(retry));
    runtime.register_task_fn(task_id, move |input: Value| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < failures {
                return Err(anyhow::anyhow!("transient failure #{}", n + 1));
            }
            Ok(input)
        }
    });
    calls
}

/// Register a task that sleeps for `delay` and then returns `output`
pub fn register_delayed_task(runtime: &ReactiveRuntime, task_id: &str, delay: Duration, output: Value) {
    runtime.register_task(TaskDefinition::new(task_id).with_retry(RetryPolicy::none()));
    runtime.register_task_fn(task_id, move |_| {
        let output = output.clone();
        async move {
            tokio::time::sleep(delay).await;
            Ok(output)
        }
    });
}

/// Register a task that logs its name and succeeds or fails as told
pub fn register_logged_task(runtime: &ReactiveRuntime, task_id: &str, log: &CallLog, succeed: bool) {
    runtime.register_task(TaskDefinition::new(task_id).with_retry(RetryPolicy::none()));
    let log = log.clone();
    let name = task_id.to_string();
    runtime.register_task_fn(task_id, move |_| {
        log.record(&name);
        let name = name.clone();
        async move {
            if succeed {
                Ok(serde_json::json!({ "task": name, "done": true }))
            } else {
                Err(anyhow::anyhow!("{name} failed"))
            }
        }
    });
}
