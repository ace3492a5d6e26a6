//! # Event Bus
//!
//! In-process publish/subscribe dispatcher used by every runtime component.
//!
//! Subscribers register under an exact event type, the `*` wildcard, or a
//! prefix/suffix pattern such as `task.*`. Each publish delivers to the
//! matching subscribers one at a time in registration order. A failing or
//! panicking subscriber never interrupts delivery to the others: the
//! failure is logged and re-announced as a `system.error` event.
//!
//! Every event is also sent on a broadcast channel for consumers that
//! prefer a stream (`subscribe_channel`). Lagging receivers drop events;
//! publishing never waits on them.

use super::types::{Event, EventSubscriber, FnSubscriber, HandlerError, SubscriptionId};
use crate::config::EventBusConfig;
use crate::constants::{events, system};
use crate::logging::log_error;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

struct Subscription {
    id: SubscriptionId,
    pattern: String,
    subscriber: Arc<dyn EventSubscriber>,
}

struct BusInner {
    subscriptions: RwLock<Vec<Subscription>>,
    sender: broadcast::Sender<Event>,
    events_published: AtomicU64,
    handler_failures: AtomicU64,
}

/// Delivery statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventBusStats {
    pub subscriptions: usize,
    pub events_published: u64,
    pub handler_failures: u64,
}

struct DeliveryFailure {
    subscriber: String,
    pattern: String,
    error: String,
}

/// Cheaply clonable handle to a shared bus
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.inner.subscriptions.read().len())
            .field("channel_receivers", &self.inner.sender.receiver_count())
            .finish()
    }
}

impl EventBus {
    /// Create a bus whose broadcast channel holds `capacity` events per receiver
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                subscriptions: RwLock::new(Vec::new()),
                sender,
                events_published: AtomicU64::new(0),
                handler_failures: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_config(config: &EventBusConfig) -> Self {
        Self::new(config.channel_capacity)
    }

    /// Register a subscriber for an event type or pattern
    pub fn subscribe(
        &self,
        pattern: impl Into<String>,
        subscriber: Arc<dyn EventSubscriber>,
    ) -> SubscriptionId {
        let pattern = pattern.into();
        let id = SubscriptionId::new();
        debug!(
            subscription_id = %id,
            pattern = %pattern,
            subscriber = subscriber.subscriber_name(),
            "Registered event subscriber"
        );
        self.inner.subscriptions.write().push(Subscription {
            id,
            pattern,
            subscriber,
        });
        id
    }

    /// Register an async closure as a subscriber
    pub fn subscribe_fn<F, Fut>(&self, pattern: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let pattern = pattern.into();
        let subscriber = FnSubscriber::new(format!("fn:{pattern}"), handler);
        self.subscribe(pattern, Arc::new(subscriber))
    }

    /// Remove a subscription. Returns false when the id was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.inner.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        before != subscriptions.len()
    }

    /// Stream of every event published after this call
    pub fn subscribe_channel(&self) -> broadcast::Receiver<Event> {
        self.inner.sender.subscribe()
    }

    /// Publish an event and deliver it to every matching subscriber
    pub async fn publish(&self, event_type: impl Into<String>, payload: Value) -> Event {
        let event = Event::new(event_type, payload);
        self.publish_event(event.clone()).await;
        event
    }

    /// Publish an already-built event
    pub async fn publish_event(&self, event: Event) {
        self.inner.events_published.fetch_add(1, Ordering::Relaxed);

        // No receivers is fine; channel consumers are optional
        let _ = self.inner.sender.send(event.clone());

        let failures = self.deliver(&event).await;
        if event.event_type == events::SYSTEM_ERROR {
            return;
        }

        for failure in failures {
            let system_event = Event::new(
                events::SYSTEM_ERROR,
                json!({
                    "source_event_id": event.id,
                    "source_event_type": event.event_type,
                    "subscriber": failure.subscriber,
                    "pattern": failure.pattern,
                    "error": failure.error,
                }),
            );
            self.inner.events_published.fetch_add(1, Ordering::Relaxed);
            let _ = self.inner.sender.send(system_event.clone());
            // Failures while reporting failures are only logged
            self.deliver(&system_event).await;
        }
    }

    async fn deliver(&self, event: &Event) -> Vec<DeliveryFailure> {
        // Snapshot so subscribers may (un)subscribe while being called
        let matching: Vec<(String, Arc<dyn EventSubscriber>)> = self
            .inner
            .subscriptions
            .read()
            .iter()
            .filter(|s| matches_pattern(&event.event_type, &s.pattern))
            .map(|s| (s.pattern.clone(), Arc::clone(&s.subscriber)))
            .collect();

        let mut failures = Vec::new();
        for (pattern, subscriber) in matching {
            let outcome = AssertUnwindSafe(subscriber.handle_event(event))
                .catch_unwind()
                .await;

            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };

            self.inner.handler_failures.fetch_add(1, Ordering::Relaxed);
            log_error(
                subscriber.subscriber_name(),
                &event.event_type,
                &error,
                Some(&event.id.to_string()),
            );
            failures.push(DeliveryFailure {
                subscriber: subscriber.subscriber_name().to_string(),
                pattern,
                error,
            });
        }
        failures
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriptions.read().len()
    }

    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            subscriptions: self.subscriber_count(),
            events_published: self.inner.events_published.load(Ordering::Relaxed),
            handler_failures: self.inner.handler_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_config(&EventBusConfig::default())
    }
}

/// `*` matches everything; `prefix*` and `*suffix` match by affix
pub(crate) fn matches_pattern(event_type: &str, pattern: &str) -> bool {
    if pattern == system::WILDCARD {
        true
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        event_type.starts_with(prefix)
    } else if let Some(suffix) = pattern.strip_prefix('*') {
        event_type.ends_with(suffix)
    } else {
        event_type == pattern
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("subscriber panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("subscriber panicked: {msg}")
    } else {
        "subscriber panicked".to_string()
    }
}
