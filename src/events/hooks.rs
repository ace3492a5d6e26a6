//! Before/after task hooks.
//!
//! Hooks are plain bus subscriptions on the task lifecycle events. Their
//! ordering is whatever the bus gives: registration order.

use super::bus::EventBus;
use super::types::{EventSubscriber, SubscriptionId};
use crate::constants::events;
use std::sync::Arc;

/// Points in a task execution where a hook may observe it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// Fired with `task.started`
    BeforeTask,
    /// Fired with `task.completed` and `task.failed`
    AfterTask,
}

impl HookPoint {
    pub fn event_types(&self) -> &'static [&'static str] {
        match self {
            Self::BeforeTask => &[events::TASK_STARTED],
            Self::AfterTask => &[events::TASK_COMPLETED, events::TASK_FAILED],
        }
    }
}

/// Register `hook` for every event behind `point`
pub fn register_hook(
    bus: &EventBus,
    point: HookPoint,
    hook: Arc<dyn EventSubscriber>,
) -> Vec<SubscriptionId> {
    point
        .event_types()
        .iter()
        .map(|event_type| bus.subscribe(*event_type, Arc::clone(&hook)))
        .collect()
}

/// Remove every subscription created by `register_hook`
pub fn unregister_hook(bus: &EventBus, ids: &[SubscriptionId]) {
    for id in ids {
        bus.unsubscribe(*id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_after_task_covers_both_outcomes() {
        assert_eq!(HookPoint::AfterTask.event_types().len(), 2);
        assert_eq!(HookPoint::BeforeTask.event_types(), &[events::TASK_STARTED]);
    }
}
