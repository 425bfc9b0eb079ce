//! Builder for constructing machines.

use crate::builder::error::BuildError;
use crate::builder::state::StateBuilder;
use crate::builder::transition::TransitionBuilder;
use crate::builder::validation;
use crate::config::MachineConfig;
use crate::core::{Callback, CallbackTable, EventRegistry, Hooks, Predicate, StateRegistry};
use crate::engine::{AdmissionMode, AsyncMachine, Definitions, Machine, MachineOptions};

/// Builder for [`Machine`] and [`AsyncMachine`] with a fluent API.
///
/// # Example
///
/// ```rust
/// use canopy::{MachineBuilder, StateBuilder, TransitionBuilder};
///
/// struct Player;
///
/// let machine = MachineBuilder::<Player>::new()
///     .name("player")
///     .state(StateBuilder::new("stopped"))
///     .state(
///         StateBuilder::new("playing")
///             .children(["normal", "fast"])
///             .initial("normal"),
///     )
///     .initial("stopped")
///     .transition(TransitionBuilder::new("play").from("stopped").to("playing"))
///     .transition(TransitionBuilder::new("stop").from("playing").to("stopped"))
///     .build()
///     .unwrap();
///
/// let player = machine.add_model(Player).unwrap();
/// machine.trigger(player, "play").unwrap();
/// assert_eq!(machine.state(player).unwrap(), vec!["playing_normal"]);
/// ```
pub struct MachineBuilder<M> {
    options: MachineOptions,
    states: Vec<StateBuilder<M>>,
    transitions: Vec<TransitionBuilder<M>>,
    hooks: Hooks<M>,
    callbacks: CallbackTable<M>,
}

impl<M: Send + Sync + 'static> MachineBuilder<M> {
    pub fn new() -> Self {
        Self {
            options: MachineOptions::default(),
            states: Vec::new(),
            transitions: Vec::new(),
            hooks: Hooks::default(),
            callbacks: CallbackTable::new(),
        }
    }

    /// Start from a declarative configuration. Callbacks named there are
    /// resolved when they run, so register them with [`callback`] and
    /// [`predicate`] or on the attached models.
    ///
    /// [`callback`]: MachineBuilder::callback
    /// [`predicate`]: MachineBuilder::predicate
    pub fn from_config(config: MachineConfig) -> Self {
        config.into_builder()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = name.into();
        self
    }

    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.options.separator = separator.into();
        self
    }

    pub fn options(mut self, options: MachineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(mut self, state: StateBuilder<M>) -> Self {
        self.states.push(state);
        self
    }

    /// Add flat states by name.
    pub fn states<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.states.extend(names.into_iter().map(StateBuilder::new));
        self
    }

    pub fn transition(mut self, transition: TransitionBuilder<M>) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn transitions(mut self, transitions: impl IntoIterator<Item = TransitionBuilder<M>>) -> Self {
        self.transitions.extend(transitions);
        self
    }

    /// Initial state of newly attached models (required). Call more than
    /// once to start in several states.
    pub fn initial(mut self, state: impl Into<String>) -> Self {
        self.options.initial.push(state.into());
        self
    }

    pub fn auto_transitions(mut self, enabled: bool) -> Self {
        self.options.auto_transitions = enabled;
        self
    }

    pub fn ignore_invalid_triggers(mut self, ignore: bool) -> Self {
        self.options.ignore_invalid_triggers = ignore;
        self
    }

    /// Queue triggers fired while a transition is running instead of
    /// rejecting them.
    pub fn queued(mut self, queued: bool) -> Self {
        self.options.mode = if queued {
            AdmissionMode::Queued
        } else {
            AdmissionMode::Immediate
        };
        self
    }

    /// Record up to `limit` transitions per model.
    pub fn history_limit(mut self, limit: usize) -> Self {
        self.options.history_limit = Some(limit);
        self
    }

    pub fn prepare_event(mut self, callback: impl Into<Callback<M>>) -> Self {
        self.hooks.prepare_event.push(callback.into());
        self
    }

    pub fn before_state_change(mut self, callback: impl Into<Callback<M>>) -> Self {
        self.hooks.before_state_change.push(callback.into());
        self
    }

    pub fn after_state_change(mut self, callback: impl Into<Callback<M>>) -> Self {
        self.hooks.after_state_change.push(callback.into());
        self
    }

    /// Runs after every trigger, whether it succeeded or failed.
    pub fn finalize_event(mut self, callback: impl Into<Callback<M>>) -> Self {
        self.hooks.finalize_event.push(callback.into());
        self
    }

    /// Handles errors raised while processing a trigger. When set, the
    /// trigger returns [`Outcome::NotExecuted`](crate::Outcome::NotExecuted)
    /// instead of the error.
    pub fn on_exception(mut self, callback: impl Into<Callback<M>>) -> Self {
        self.hooks.on_exception.push(callback.into());
        self
    }

    /// Runs when a transition enters a final leaf state.
    pub fn on_final(mut self, callback: impl Into<Callback<M>>) -> Self {
        self.hooks.on_final.push(callback.into());
        self
    }

    pub fn callback(mut self, name: impl Into<String>, callback: Callback<M>) -> Self {
        self.callbacks.insert_callback(name, callback);
        self
    }

    pub fn predicate(mut self, name: impl Into<String>, predicate: Predicate<M>) -> Self {
        self.callbacks.insert_predicate(name, predicate);
        self
    }

    pub fn build(self) -> Result<Machine<M>, BuildError> {
        Ok(Machine::from_definitions(self.definitions()?))
    }

    pub fn build_async(self) -> Result<AsyncMachine<M>, BuildError> {
        Ok(AsyncMachine::from_definitions(self.definitions()?))
    }

    fn definitions(self) -> Result<Definitions<M>, BuildError> {
        if self.options.initial.is_empty() {
            return Err(BuildError::MissingInitialState);
        }
        let separator = self.options.separator.clone();
        validation::into_result(validation::validate_declarations(&self.states, &separator))?;

        let mut definitions = Definitions {
            states: StateRegistry::new(separator.clone()),
            events: EventRegistry::new(),
            hooks: self.hooks,
            callbacks: self.callbacks,
            options: self.options,
        };

        let mut transitions = Vec::new();
        for state in self.states {
            let (states, scoped) = state.flatten(None, &separator);
            definitions.register_states(states)?;
            transitions.extend(scoped);
        }
        validation::into_result(validation::validate_initial(
            &definitions.states,
            &definitions.options.initial,
        ))?;

        transitions.extend(self.transitions);
        definitions.register_transitions(transitions)?;

        tracing::debug!(
            machine = %definitions.options.name,
            states = definitions.states.len(),
            "built machine definitions"
        );
        Ok(definitions)
    }
}

impl<M: Send + Sync + 'static> Default for MachineBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::error::ConfigIssue;

    struct Model;

    #[test]
    fn builder_requires_initial_state() {
        let result = MachineBuilder::<Model>::new().states(["A"]).build();

        assert!(matches!(result, Err(BuildError::MissingInitialState)));
    }

    #[test]
    fn builder_rejects_unknown_transition_states() {
        let result = MachineBuilder::<Model>::new()
            .states(["A"])
            .initial("A")
            .transition(TransitionBuilder::new("go").from("A").to("Nowhere"))
            .build();

        match result {
            Err(BuildError::Invalid(issues)) => assert_eq!(
                issues,
                vec![ConfigIssue::UnknownState {
                    context: "Transition 'go'".into(),
                    name: "Nowhere".into(),
                }]
            ),
            other => panic!("Expected invalid definition, got {:?}", other.err()),
        }
    }

    #[test]
    fn auto_transitions_precede_declared_ones() {
        let machine = MachineBuilder::<Model>::new()
            .states(["A", "B"])
            .initial("A")
            .transition(TransitionBuilder::new("go").from("A").to("B"))
            .build()
            .unwrap();

        assert_eq!(machine.triggers(), vec!["to_A", "to_B", "go"]);
    }

    #[test]
    fn auto_transitions_can_be_disabled() {
        let machine = MachineBuilder::<Model>::new()
            .states(["A"])
            .initial("A")
            .auto_transitions(false)
            .build()
            .unwrap();

        assert!(machine.triggers().is_empty());
    }

    #[test]
    fn nested_states_get_qualified_auto_transitions() {
        let machine = MachineBuilder::<Model>::new()
            .state(StateBuilder::new("A").children(["1"]))
            .initial("A")
            .build()
            .unwrap();

        assert!(machine.triggers().contains(&"to_A_1".to_string()));
    }
}
