use crate::constants::system::WILDCARD;
use crate::error::{Result, RuntimeError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Event-triggered edge between two process states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// Source state, or `*` for any state
    pub from: String,
    pub to: String,
    /// Event name that fires the transition
    pub on: String,
}

impl Transition {
    pub fn new(from: impl Into<String>, to: impl Into<String>, on: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            on: on.into(),
        }
    }

    /// Transition that applies from every state
    pub fn from_any(to: impl Into<String>, on: impl Into<String>) -> Self {
        Self::new(WILDCARD, to, on)
    }

    pub fn is_wildcard(&self) -> bool {
        self.from == WILDCARD
    }

    pub fn matches(&self, current_state: &str, event: &str) -> bool {
        self.on == event && (self.is_wildcard() || self.from == current_state)
    }
}

/// State machine definition for a process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    pub id: String,
    pub description: Option<String>,
    /// Declared states, in declaration order
    pub states: Vec<String>,
    pub initial_state: String,
    /// Checked in declaration order; the first match wins
    pub transitions: Vec<Transition>,
    /// Tasks explicitly associated with a state. States without an entry
    /// have no tasks; nothing is inferred.
    #[serde(default)]
    pub state_tasks: HashMap<String, Vec<String>>,
}

impl ProcessDefinition {
    pub fn new<S: Into<String>>(
        id: impl Into<String>,
        states: impl IntoIterator<Item = S>,
        initial_state: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: None,
            states: states.into_iter().map(Into::into).collect(),
            initial_state: initial_state.into(),
            transitions: Vec::new(),
            state_tasks: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn with_state_tasks<S: Into<String>>(
        mut self,
        state: impl Into<String>,
        task_ids: impl IntoIterator<Item = S>,
    ) -> Self {
        self.state_tasks
            .insert(state.into(), task_ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn has_state(&self, state: &str) -> bool {
        self.states.iter().any(|s| s == state)
    }

    /// First transition fired by `event` while in `current_state`
    pub fn find_transition(&self, current_state: &str, event: &str) -> Option<&Transition> {
        self.transitions
            .iter()
            .find(|t| t.matches(current_state, event))
    }

    /// Distinct events that would fire a transition from `current_state`
    pub fn available_events(&self, current_state: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.transitions
            .iter()
            .filter(|t| t.is_wildcard() || t.from == current_state)
            .filter(|t| seen.insert(t.on.clone()))
            .map(|t| t.on.clone())
            .collect()
    }

    /// Tasks configured for `state`; empty when none were configured
    pub fn tasks_for_state(&self, state: &str) -> &[String] {
        self.state_tasks
            .get(state)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Structural checks for definition loaders. The manager itself trusts
    /// its definitions and does not call this.
    pub fn validate(&self) -> Result<()> {
        if self.states.is_empty() {
            return Err(RuntimeError::Configuration(format!(
                "process {} declares no states",
                self.id
            )));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self.states.iter().find(|s| !seen.insert(s.as_str())) {
            return Err(RuntimeError::Configuration(format!(
                "process {} declares state {dup} twice",
                self.id
            )));
        }

        if !self.has_state(&self.initial_state) {
            return Err(RuntimeError::Configuration(format!(
                "process {} initial state {} is not a declared state",
                self.id, self.initial_state
            )));
        }

        for transition in &self.transitions {
            if !self.has_state(&transition.to) {
                return Err(RuntimeError::Configuration(format!(
                    "process {} transition on {} targets unknown state {}",
                    self.id, transition.on, transition.to
                )));
            }
            if !transition.is_wildcard() && !self.has_state(&transition.from) {
                return Err(RuntimeError::Configuration(format!(
                    "process {} transition on {} starts from unknown state {}",
                    self.id, transition.on, transition.from
                )));
            }
        }

        if let Some(state) = self.state_tasks.keys().find(|s| !self.has_state(s)) {
            return Err(RuntimeError::Configuration(format!(
                "process {} associates tasks with unknown state {state}",
                self.id
            )));
        }

        Ok(())
    }
}
