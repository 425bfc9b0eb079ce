//! Transition definitions.

use super::callback::Callback;
use super::guard::Condition;
use std::fmt;

/// Which active state a transition may start from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Source {
    /// Matches every state.
    Any,
    /// Matches the state with this qualified name.
    State(String),
}

impl Source {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Source::Any => true,
            Source::State(source) => source == name,
        }
    }
}

/// Where a transition leads.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    /// Exit the source path and enter this state.
    State(String),
    /// Exit and re-enter the state the transition matched from.
    Reflexive,
    /// Run callbacks without exiting or entering anything.
    Internal,
}

/// A triggerable edge between states.
pub struct Transition<M> {
    pub(crate) trigger: String,
    pub(crate) source: Source,
    pub(crate) target: Target,
    pub(crate) conditions: Vec<Condition<M>>,
    pub(crate) prepare: Vec<Callback<M>>,
    pub(crate) before: Vec<Callback<M>>,
    pub(crate) after: Vec<Callback<M>>,
}

impl<M> Clone for Transition<M> {
    fn clone(&self) -> Self {
        Self {
            trigger: self.trigger.clone(),
            source: self.source.clone(),
            target: self.target.clone(),
            conditions: self.conditions.clone(),
            prepare: self.prepare.clone(),
            before: self.before.clone(),
            after: self.after.clone(),
        }
    }
}

impl<M> fmt::Debug for Transition<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("trigger", &self.trigger)
            .field("source", &self.source)
            .field("target", &self.target)
            .field("conditions", &self.conditions.len())
            .finish_non_exhaustive()
    }
}

impl<M> Transition<M> {
    pub(crate) fn new(trigger: impl Into<String>, source: Source, target: Target) -> Self {
        Self {
            trigger: trigger.into(),
            source,
            target,
            conditions: Vec::new(),
            prepare: Vec::new(),
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn conditions(&self) -> &[Condition<M>] {
        &self.conditions
    }

    pub fn prepare(&self) -> &[Callback<M>] {
        &self.prepare
    }

    pub fn before(&self) -> &[Callback<M>] {
        &self.before
    }

    pub fn after(&self) -> &[Callback<M>] {
        &self.after
    }

    pub fn is_internal(&self) -> bool {
        self.target == Target::Internal
    }

    /// Qualified destination when fired from `source`, `None` for internal
    /// transitions.
    pub fn destination(&self, source: &str) -> Option<String> {
        match &self.target {
            Target::State(dest) => Some(dest.clone()),
            Target::Reflexive => Some(source.to_string()),
            Target::Internal => None,
        }
    }
}
