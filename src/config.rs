//! Declarative machine definitions.
//!
//! A [`MachineConfig`] describes states, transitions and hooks in plain
//! data, typically loaded from JSON. Callbacks and conditions are referred
//! to by name and resolved against the machine's and the models' callback
//! tables when they run.
//!
//! ```json
//! {
//!   "name": "door",
//!   "initial": "closed",
//!   "states": ["closed", {"name": "open", "on_enter": "log_open"}],
//!   "transitions": [
//!     ["open", "closed", "open"],
//!     {"trigger": "close", "source": "open", "dest": "closed", "conditions": "is_clear"}
//!   ]
//! }
//! ```
//!
//! A source of `"*"` matches every state, a destination of `"="` re-enters
//! the source, and a `null` destination makes the transition internal.

use crate::builder::{BuildError, MachineBuilder, StateBuilder, TransitionBuilder};
use crate::core::{Callback, Condition, Predicate};
use serde::{Deserialize, Serialize};

const ANY_SOURCE: &str = "*";
const SAME_STATE: &str = "=";

/// Either a single name or a list of names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(name) => vec![name],
            OneOrMany::Many(names) => names,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub name: String,
    pub separator: String,
    pub initial: OneOrMany,
    pub states: Vec<StateConfig>,
    pub transitions: Vec<TransitionConfig>,
    pub auto_transitions: bool,
    pub ignore_invalid_triggers: bool,
    pub queued: bool,
    pub history_limit: Option<usize>,
    pub prepare_event: OneOrMany,
    pub before_state_change: OneOrMany,
    pub after_state_change: OneOrMany,
    pub finalize_event: OneOrMany,
    pub on_exception: OneOrMany,
    pub on_final: OneOrMany,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            separator: "_".to_string(),
            initial: OneOrMany::default(),
            states: Vec::new(),
            transitions: Vec::new(),
            auto_transitions: true,
            ignore_invalid_triggers: false,
            queued: false,
            history_limit: None,
            prepare_event: OneOrMany::default(),
            before_state_change: OneOrMany::default(),
            after_state_change: OneOrMany::default(),
            finalize_event: OneOrMany::default(),
            on_exception: OneOrMany::default(),
            on_final: OneOrMany::default(),
        }
    }
}

impl MachineConfig {
    pub fn from_json(json: &str) -> Result<Self, BuildError> {
        serde_json::from_str(json).map_err(|e| BuildError::Json(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, BuildError> {
        serde_json::to_string_pretty(self).map_err(|e| BuildError::Json(e.to_string()))
    }

    pub(crate) fn into_builder<M: Send + Sync + 'static>(self) -> MachineBuilder<M> {
        let mut builder = MachineBuilder::new()
            .name(self.name)
            .separator(self.separator)
            .auto_transitions(self.auto_transitions)
            .ignore_invalid_triggers(self.ignore_invalid_triggers)
            .queued(self.queued);
        if let Some(limit) = self.history_limit {
            builder = builder.history_limit(limit);
        }
        for name in self.initial.into_vec() {
            builder = builder.initial(name);
        }
        for state in self.states {
            builder = builder.state(state.into_builder());
        }
        for transition in self.transitions {
            builder = builder.transition(transition.into_builder());
        }

        for name in self.prepare_event.into_vec() {
            builder = builder.prepare_event(name);
        }
        for name in self.before_state_change.into_vec() {
            builder = builder.before_state_change(name);
        }
        for name in self.after_state_change.into_vec() {
            builder = builder.after_state_change(name);
        }
        for name in self.finalize_event.into_vec() {
            builder = builder.finalize_event(name);
        }
        for name in self.on_exception.into_vec() {
            builder = builder.on_exception(name);
        }
        for name in self.on_final.into_vec() {
            builder = builder.on_final(name);
        }
        builder
    }
}

/// A state given by name alone or with its full definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateConfig {
    Name(String),
    Full(StateDefinition),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDefinition {
    pub name: String,
    #[serde(default)]
    pub children: Vec<StateConfig>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub initial: OneOrMany,
    #[serde(default)]
    pub on_enter: OneOrMany,
    #[serde(default)]
    pub on_exit: OneOrMany,
    #[serde(default, rename = "final")]
    pub is_final: bool,
    #[serde(default)]
    pub ignore_invalid_triggers: Option<bool>,
    /// Transitions with state names relative to this state.
    #[serde(default)]
    pub transitions: Vec<TransitionConfig>,
}

impl StateConfig {
    fn into_builder<M: 'static>(self) -> StateBuilder<M> {
        let definition = match self {
            StateConfig::Name(name) => return StateBuilder::new(name),
            StateConfig::Full(definition) => definition,
        };

        let mut builder = StateBuilder::new(definition.name);
        if definition.parallel {
            builder = builder.parallel();
        }
        if definition.is_final {
            builder = builder.final_state();
        }
        if let Some(ignore) = definition.ignore_invalid_triggers {
            builder = builder.ignore_invalid_triggers(ignore);
        }
        for child in definition.initial.into_vec() {
            builder = builder.initial(child);
        }
        for name in definition.on_enter.into_vec() {
            builder = builder.on_enter(name);
        }
        for name in definition.on_exit.into_vec() {
            builder = builder.on_exit(name);
        }
        for child in definition.children {
            builder = builder.child(child.into_builder());
        }
        for transition in definition.transitions {
            builder = builder.transition(transition.into_builder());
        }
        builder
    }
}

/// A transition as `[trigger, source(s), dest]` or as a full definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransitionConfig {
    Short(String, OneOrMany, Option<String>),
    Full(TransitionDefinition),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionDefinition {
    pub trigger: String,
    pub source: OneOrMany,
    #[serde(default)]
    pub dest: Option<String>,
    #[serde(default)]
    pub conditions: OneOrMany,
    #[serde(default)]
    pub unless: OneOrMany,
    #[serde(default)]
    pub prepare: OneOrMany,
    #[serde(default)]
    pub before: OneOrMany,
    #[serde(default)]
    pub after: OneOrMany,
}

impl TransitionConfig {
    fn into_builder<M: 'static>(self) -> TransitionBuilder<M> {
        let definition = match self {
            TransitionConfig::Short(trigger, source, dest) => TransitionDefinition {
                trigger,
                source,
                dest,
                ..TransitionDefinition::default()
            },
            TransitionConfig::Full(definition) => definition,
        };

        let mut builder = TransitionBuilder::new(definition.trigger);
        for source in definition.source.into_vec() {
            builder = if source == ANY_SOURCE {
                builder.from_any()
            } else {
                builder.from(source)
            };
        }
        builder = match definition.dest.as_deref() {
            None => builder.internal(),
            Some(SAME_STATE) => builder.reflexive(),
            Some(dest) => builder.to(dest),
        };
        for name in definition.conditions.into_vec() {
            builder = builder.condition(Condition::when(Predicate::named(name)));
        }
        for name in definition.unless.into_vec() {
            builder = builder.condition(Condition::unless(Predicate::named(name)));
        }
        for name in definition.prepare.into_vec() {
            builder = builder.prepare(Callback::named(name));
        }
        for name in definition.before.into_vec() {
            builder = builder.before(Callback::named(name));
        }
        for name in definition.after.into_vec() {
            builder = builder.after(Callback::named(name));
        }
        builder
    }
}
