//! State and event registries plus machine-wide hooks.

use super::callback::Callback;
use super::state::State;
use super::transition::Transition;
use super::tree::Topology;
use crate::builder::BuildError;
use std::collections::HashMap;
use std::sync::Arc;

/// Every declared state, keyed by qualified name.
pub struct StateRegistry<M> {
    states: Vec<Arc<State<M>>>,
    index: HashMap<String, usize>,
    roots: Vec<String>,
    separator: String,
}

impl<M> Clone for StateRegistry<M> {
    fn clone(&self) -> Self {
        Self {
            states: self.states.clone(),
            index: self.index.clone(),
            roots: self.roots.clone(),
            separator: self.separator.clone(),
        }
    }
}

impl<M> StateRegistry<M> {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            states: Vec::new(),
            index: HashMap::new(),
            roots: Vec::new(),
            separator: separator.into(),
        }
    }

    /// Register a state, or replace the definition with the same name.
    ///
    /// A nested name requires its parent to be registered already; the
    /// state's last segment is appended to the parent's children.
    pub fn insert(&mut self, mut state: State<M>) -> Result<(), BuildError> {
        let name = state.name.clone();
        if let Some(&slot) = self.index.get(&name) {
            if state.children.is_empty() {
                state.children = self.states[slot].children.clone();
            }
            self.states[slot] = Arc::new(state);
            return Ok(());
        }

        match name.rsplit_once(self.separator.as_str()) {
            Some((parent, segment)) => {
                let slot = *self
                    .index
                    .get(parent)
                    .ok_or_else(|| BuildError::UnknownState(parent.to_string()))?;
                if !self.states[slot].children.iter().any(|c| c == segment) {
                    let mut updated = State::clone(&self.states[slot]);
                    updated.children.push(segment.to_string());
                    self.states[slot] = Arc::new(updated);
                }
            }
            None => self.roots.push(name.clone()),
        }

        self.index.insert(name, self.states.len());
        self.states.push(Arc::new(state));
        Ok(())
    }

    /// Replace a registered state with a modified copy.
    pub(crate) fn update<F>(&mut self, name: &str, change: F) -> Result<(), BuildError>
    where
        F: FnOnce(&mut State<M>),
    {
        let slot = *self
            .index
            .get(name)
            .ok_or_else(|| BuildError::UnknownState(name.to_string()))?;
        let mut updated = State::clone(&self.states[slot]);
        change(&mut updated);
        self.states[slot] = Arc::new(updated);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<State<M>>> {
        self.index.get(name).map(|&slot| &self.states[slot])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// States in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<State<M>>> {
        self.states.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.states.iter().map(|s| s.name.clone()).collect()
    }

    /// Top-level state names in declaration order.
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub(crate) fn qualify(&self, parent: &str, segment: &str) -> String {
        format!("{parent}{}{segment}", self.separator)
    }
}

impl<M> Topology for StateRegistry<M> {
    fn separator(&self) -> &str {
        &self.separator
    }

    fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn children(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|state| state.children.clone())
            .unwrap_or_default()
    }

    fn is_parallel(&self, name: &str) -> bool {
        self.get(name).map(|state| state.parallel).unwrap_or(false)
    }

    fn initial(&self, name: &str) -> Vec<String> {
        self.get(name).map(|state| state.initial()).unwrap_or_default()
    }
}

/// All transitions registered for one trigger.
pub struct Event<M> {
    name: String,
    transitions: Vec<Arc<Transition<M>>>,
}

impl<M> Clone for Event<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            transitions: self.transitions.clone(),
        }
    }
}

impl<M> Event<M> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transitions in registration order.
    pub fn transitions(&self) -> &[Arc<Transition<M>>] {
        &self.transitions
    }

    /// Candidates for `source`, in registration order.
    pub fn candidates(&self, source: &str) -> Vec<Arc<Transition<M>>> {
        self.transitions
            .iter()
            .filter(|transition| transition.source.matches(source))
            .cloned()
            .collect()
    }
}

/// Transitions grouped by trigger.
pub struct EventRegistry<M> {
    events: Vec<Event<M>>,
    index: HashMap<String, usize>,
}

impl<M> Default for EventRegistry<M> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<M> Clone for EventRegistry<M> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
            index: self.index.clone(),
        }
    }
}

impl<M> EventRegistry<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, transition: Transition<M>) {
        let slot = match self.index.get(&transition.trigger) {
            Some(&slot) => slot,
            None => {
                self.index
                    .insert(transition.trigger.clone(), self.events.len());
                self.events.push(Event {
                    name: transition.trigger.clone(),
                    transitions: Vec::new(),
                });
                self.events.len() - 1
            }
        };
        self.events[slot].transitions.push(Arc::new(transition));
    }

    pub fn get(&self, trigger: &str) -> Option<&Event<M>> {
        self.index.get(trigger).map(|&slot| &self.events[slot])
    }

    pub fn contains(&self, trigger: &str) -> bool {
        self.index.contains_key(trigger)
    }

    /// Candidates for `trigger` fired from `source`.
    pub fn candidates(&self, trigger: &str, source: &str) -> Vec<Arc<Transition<M>>> {
        self.get(trigger)
            .map(|event| event.candidates(source))
            .unwrap_or_default()
    }

    /// Trigger names in registration order.
    pub fn triggers(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(|event| event.name.as_str())
    }
}

/// Machine-wide callbacks run on every trigger.
pub struct Hooks<M> {
    pub(crate) prepare_event: Vec<Callback<M>>,
    pub(crate) before_state_change: Vec<Callback<M>>,
    pub(crate) after_state_change: Vec<Callback<M>>,
    pub(crate) finalize_event: Vec<Callback<M>>,
    pub(crate) on_exception: Vec<Callback<M>>,
    pub(crate) on_final: Vec<Callback<M>>,
}

impl<M> Default for Hooks<M> {
    fn default() -> Self {
        Self {
            prepare_event: Vec::new(),
            before_state_change: Vec::new(),
            after_state_change: Vec::new(),
            finalize_event: Vec::new(),
            on_exception: Vec::new(),
            on_final: Vec::new(),
        }
    }
}

impl<M> Clone for Hooks<M> {
    fn clone(&self) -> Self {
        Self {
            prepare_event: self.prepare_event.clone(),
            before_state_change: self.before_state_change.clone(),
            after_state_change: self.after_state_change.clone(),
            finalize_event: self.finalize_event.clone(),
            on_exception: self.on_exception.clone(),
            on_final: self.on_final.clone(),
        }
    }
}
