//! # Event System
//!
//! Publish/subscribe plumbing shared by the process manager, task executor,
//! flow orchestrator, circuit breakers and saga coordinator.

pub mod bus;
pub mod hooks;
pub mod types;

// Re-export key types for convenience
pub use bus::{EventBus, EventBusStats};
pub use hooks::{register_hook, unregister_hook, HookPoint};
pub use types::{Event, EventSubscriber, FnSubscriber, HandlerError, SubscriptionId};
