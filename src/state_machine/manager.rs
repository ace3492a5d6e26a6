//! # Process State Machine Manager
//!
//! Holds process definitions and their live instances, and applies
//! event-driven transitions.
//!
//! ## Concurrency
//!
//! Each instance sits behind its own async mutex, so concurrent
//! transitions of one instance are serialized while different instances
//! progress independently. State-change events are published after the
//! instance lock is released; a subscriber may therefore request another
//! transition of the same instance without deadlocking.

use super::definition::ProcessDefinition;
use crate::constants::events;
use crate::error::{DefinitionKind, Result, RuntimeError};
use crate::events::{Event, EventBus, EventSubscriber, HandlerError, SubscriptionId};
use crate::logging::log_process_operation;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Record of one applied transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: String,
    pub to: String,
    pub event: String,
    pub at: DateTime<Utc>,
}

/// Live execution of a process definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub id: Uuid,
    pub process_id: String,
    pub state: String,
    pub context: Map<String, Value>,
    pub history: Vec<TransitionRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct ProcessManager {
    definitions: DashMap<String, Arc<ProcessDefinition>>,
    instances: DashMap<Uuid, Arc<Mutex<ProcessInstance>>>,
    event_bus: EventBus,
}

impl ProcessManager {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            definitions: DashMap::new(),
            instances: DashMap::new(),
            event_bus,
        }
    }

    /// Register or replace a definition
    pub fn register_definition(&self, definition: ProcessDefinition) {
        debug!(process_id = %definition.id, states = definition.states.len(), "Registered process definition");
        self.definitions
            .insert(definition.id.clone(), Arc::new(definition));
    }

    pub fn get_definition(&self, process_id: &str) -> Result<Arc<ProcessDefinition>> {
        self.definitions
            .get(process_id)
            .map(|d| Arc::clone(d.value()))
            .ok_or_else(|| RuntimeError::definition_not_found(DefinitionKind::Process, process_id))
    }

    /// Create an instance in the definition's initial state
    pub async fn create_process(
        &self,
        process_id: &str,
        initial_context: Value,
    ) -> Result<ProcessInstance> {
        let definition = self.get_definition(process_id)?;
        let context = into_context(initial_context)?;
        let now = Utc::now();

        let instance = ProcessInstance {
            id: Uuid::new_v4(),
            process_id: definition.id.clone(),
            state: definition.initial_state.clone(),
            context,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        self.instances
            .insert(instance.id, Arc::new(Mutex::new(instance.clone())));

        log_process_operation(
            "create",
            &instance.process_id,
            &instance.id.to_string(),
            None,
            &instance.state,
        );
        self.event_bus
            .publish(
                events::PROCESS_CREATED,
                json!({
                    "instance_id": instance.id,
                    "process_id": instance.process_id,
                    "state": instance.state,
                }),
            )
            .await;

        Ok(instance)
    }

    /// Apply `event` to an instance.
    ///
    /// When no transition matches, the instance is returned unchanged; that
    /// is not an error.
    pub async fn transition_process(
        &self,
        instance_id: Uuid,
        event: &str,
        context_patch: Option<Value>,
    ) -> Result<ProcessInstance> {
        let slot = self.instance_slot(instance_id)?;

        let (snapshot, previous_state) = {
            let mut instance = slot.lock().await;
            let definition = self.get_definition(&instance.process_id)?;

            let Some(transition) = definition.find_transition(&instance.state, event) else {
                debug!(
                    instance_id = %instance_id,
                    state = %instance.state,
                    event = %event,
                    "No transition applies; instance unchanged"
                );
                return Ok(instance.clone());
            };

            if let Some(patch) = context_patch {
                merge_context(&mut instance.context, into_context(patch)?);
            }

            let previous_state = std::mem::replace(&mut instance.state, transition.to.clone());
            let now = Utc::now();
            instance.history.push(TransitionRecord {
                from: previous_state.clone(),
                to: transition.to.clone(),
                event: event.to_string(),
                at: now,
            });
            instance.updated_at = now;

            (instance.clone(), previous_state)
        };

        log_process_operation(
            event,
            &snapshot.process_id,
            &instance_id.to_string(),
            Some(&previous_state),
            &snapshot.state,
        );
        self.event_bus
            .publish(
                events::PROCESS_STATE_CHANGED,
                json!({
                    "instance_id": instance_id,
                    "process_id": snapshot.process_id,
                    "previous_state": previous_state,
                    "new_state": snapshot.state,
                    "event": event,
                }),
            )
            .await;

        Ok(snapshot)
    }

    pub async fn get_process_state(&self, instance_id: Uuid) -> Result<String> {
        let slot = self.instance_slot(instance_id)?;
        let instance = slot.lock().await;
        Ok(instance.state.clone())
    }

    /// Snapshot of an instance
    pub async fn get_instance(&self, instance_id: Uuid) -> Result<ProcessInstance> {
        let slot = self.instance_slot(instance_id)?;
        let instance = slot.lock().await;
        Ok(instance.clone())
    }

    /// Events that would fire a transition from the instance's current state
    pub async fn available_events(&self, instance_id: Uuid) -> Result<Vec<String>> {
        let instance = self.get_instance(instance_id).await?;
        let definition = self.get_definition(&instance.process_id)?;
        Ok(definition.available_events(&instance.state))
    }

    /// Tasks explicitly configured for the instance's current state
    pub async fn tasks_for_current_state(&self, instance_id: Uuid) -> Result<Vec<String>> {
        let instance = self.get_instance(instance_id).await?;
        let definition = self.get_definition(&instance.process_id)?;
        Ok(definition.tasks_for_state(&instance.state).to_vec())
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Drive transitions from `process.transition.requested` events
    pub fn bind_to_bus(self: &Arc<Self>) -> SubscriptionId {
        let subscriber = TransitionRequestSubscriber {
            manager: Arc::downgrade(self),
        };
        self.event_bus
            .subscribe(events::PROCESS_TRANSITION_REQUESTED, Arc::new(subscriber))
    }

    fn instance_slot(&self, instance_id: Uuid) -> Result<Arc<Mutex<ProcessInstance>>> {
        self.instances
            .get(&instance_id)
            .map(|slot| Arc::clone(slot.value()))
            .ok_or(RuntimeError::InstanceNotFound {
                kind: DefinitionKind::Process,
                id: instance_id,
            })
    }
}

fn into_context(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(RuntimeError::Configuration(format!(
            "process context must be an object, got {other}"
        ))),
    }
}

fn merge_context(context: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        context.insert(key, value);
    }
}

/// Bus subscriber that turns transition requests into transitions
struct TransitionRequestSubscriber {
    manager: Weak<ProcessManager>,
}

#[async_trait]
impl EventSubscriber for TransitionRequestSubscriber {
    async fn handle_event(&self, event: &Event) -> std::result::Result<(), HandlerError> {
        let Some(manager) = self.manager.upgrade() else {
            return Ok(());
        };

        let instance_id = event
            .payload
            .get("instance_id")
            .and_then(Value::as_str)
            .ok_or("transition request is missing instance_id")?;
        let instance_id = Uuid::parse_str(instance_id)?;
        let process_event = event
            .payload
            .get("event")
            .and_then(Value::as_str)
            .ok_or("transition request is missing event")?;
        let patch = event.payload.get("context").cloned();

        manager
            .transition_process(instance_id, process_event, patch)
            .await?;
        Ok(())
    }

    fn subscriber_name(&self) -> &str {
        "process_transition_router"
    }
}
