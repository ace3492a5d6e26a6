//! # Process State Machines
//!
//! Process definitions (states, initial state, event-triggered transitions
//! including `*` wildcard sources) and the manager that owns live
//! process instances.

pub mod definition;
pub mod manager;

// Re-export main types for convenient access
pub use definition::{ProcessDefinition, Transition};
pub use manager::{ProcessInstance, ProcessManager, TransitionRecord};
