//! Definitions snapshot and the operations shared by both machine flavors.

use super::event::Outcome;
use super::model::{Attach, ModelId, ModelSlot};
use super::scheduler::{AdmissionMode, MachineId};
use crate::builder::{validation, BuildError, StateBuilder, TransitionBuilder};
use crate::core::{
    initial_tree, resolve, Callback, CallbackTable, EventRegistry, History, Hooks, Resolution,
    Source, State, StateRegistry, StateTree, Target, Transition,
};
use crate::error::MachineError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

/// Machine-wide options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineOptions {
    /// Label prefixed to log and error messages.
    pub name: String,
    /// Separator joining nested state names.
    pub separator: String,
    /// States a model starts in when attached without its own.
    pub initial: Vec<String>,
    /// Register a `to_<state>` trigger for every state.
    pub auto_transitions: bool,
    /// Silently ignore triggers with no transition from the current state.
    pub ignore_invalid_triggers: bool,
    pub mode: AdmissionMode,
    /// Keep this many committed transitions per model.
    pub history_limit: Option<usize>,
}

impl Default for MachineOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            separator: "_".to_string(),
            initial: Vec::new(),
            auto_transitions: true,
            ignore_invalid_triggers: false,
            mode: AdmissionMode::Immediate,
            history_limit: None,
        }
    }
}

impl MachineOptions {
    pub(crate) fn label(&self) -> String {
        if self.name.is_empty() {
            String::new()
        } else {
            format!("{}: ", self.name)
        }
    }
}

/// Everything a machine knows about its states and transitions.
///
/// Running triggers hold an immutable snapshot; runtime additions build a
/// new snapshot and swap it in.
pub(crate) struct Definitions<M> {
    pub(crate) states: StateRegistry<M>,
    pub(crate) events: EventRegistry<M>,
    pub(crate) hooks: Hooks<M>,
    pub(crate) callbacks: CallbackTable<M>,
    pub(crate) options: MachineOptions,
}

impl<M> Clone for Definitions<M> {
    fn clone(&self) -> Self {
        Self {
            states: self.states.clone(),
            events: self.events.clone(),
            hooks: self.hooks.clone(),
            callbacks: self.callbacks.clone(),
            options: self.options.clone(),
        }
    }
}

impl<M: 'static> Definitions<M> {
    /// Register states, adding their auto transitions when enabled.
    pub(crate) fn register_states(&mut self, states: Vec<State<M>>) -> Result<(), BuildError> {
        for state in states {
            let name = state.name.clone();
            let is_new = !self.states.contains(&name);
            self.states.insert(state)?;
            if is_new && self.options.auto_transitions {
                self.events.add(Transition::new(
                    format!("to_{name}"),
                    Source::Any,
                    Target::State(name),
                ));
            }
        }
        Ok(())
    }

    /// Build, validate and register transitions.
    pub(crate) fn register_transitions(
        &mut self,
        builders: Vec<TransitionBuilder<M>>,
    ) -> Result<(), BuildError> {
        let mut transitions = Vec::new();
        for builder in builders {
            transitions.extend(builder.build()?);
        }
        validation::into_result(validation::validate_transitions(&self.states, &transitions))?;
        for transition in transitions {
            self.events.add(transition);
        }
        Ok(())
    }

    /// Active source paths that have candidates for `trigger`, descendants
    /// before ancestors.
    pub(crate) fn dispatch_paths(&self, tree: &StateTree, trigger: &str) -> Vec<(Vec<String>, String)> {
        let separator = self.states.separator();
        tree.resolve_order()
            .into_iter()
            .map(|path| {
                let name = path.join(separator);
                (path, name)
            })
            .filter(|(_, name)| !self.events.candidates(trigger, name).is_empty())
            .collect()
    }

    /// Outcome of a trigger that matched no transition from any active state.
    pub(crate) fn unmatched(&self, tree: &StateTree, trigger: &str) -> Result<Outcome, MachineError> {
        let leaves = tree.leaves(self.states.separator());
        for leaf in &leaves {
            let ignore = self
                .states
                .get(leaf)
                .and_then(|state| state.ignore_invalid_triggers)
                .unwrap_or(self.options.ignore_invalid_triggers);
            if ignore {
                continue;
            }
            let machine = self.options.label();
            return Err(if self.events.contains(trigger) {
                MachineError::InvalidTransition {
                    machine,
                    trigger: trigger.to_string(),
                    states: leaves.clone(),
                }
            } else {
                MachineError::UnknownTrigger {
                    machine,
                    trigger: trigger.to_string(),
                }
            });
        }
        tracing::debug!(
            machine = %self.options.name,
            trigger,
            states = ?leaves,
            "ignored trigger without matching transition"
        );
        Ok(Outcome::NotExecuted)
    }

    /// Whether the entered leaves include a final state.
    pub(crate) fn reached_final(&self, plan: &Resolution) -> bool {
        let leaves: HashSet<String> = plan
            .tree
            .leaves(self.states.separator())
            .into_iter()
            .collect();
        plan.enter.iter().any(|name| {
            leaves.contains(name)
                && self
                    .states
                    .get(name)
                    .map(|state| state.is_final)
                    .unwrap_or(false)
        })
    }

    pub(crate) fn state(&self, name: &str) -> Result<Arc<State<M>>, MachineError> {
        self.states
            .get(name)
            .cloned()
            .ok_or_else(|| MachineError::InvalidDestination(name.to_string()))
    }
}

/// Paths already handled during one trigger.
#[derive(Default)]
pub(crate) struct Resolved {
    done: HashSet<String>,
}

impl Resolved {
    pub(crate) fn contains(&self, name: &str) -> bool {
        self.done.contains(name)
    }

    /// Mark a path and all of its ancestors.
    pub(crate) fn mark(&mut self, path: &[String], separator: &str) {
        for depth in 1..=path.len() {
            self.done.insert(path[..depth].join(separator));
        }
    }
}

/// State shared by [`Machine`](crate::Machine) and
/// [`AsyncMachine`](crate::AsyncMachine).
pub(crate) struct MachineCore<M> {
    pub(crate) id: MachineId,
    definitions: RwLock<Arc<Definitions<M>>>,
    models: RwLock<Vec<Arc<ModelSlot<M>>>>,
}

impl<M: Send + Sync + 'static> MachineCore<M> {
    pub(crate) fn new(definitions: Definitions<M>) -> Self {
        Self {
            id: MachineId::new(),
            definitions: RwLock::new(Arc::new(definitions)),
            models: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn definitions(&self) -> Arc<Definitions<M>> {
        Arc::clone(&self.definitions.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn update<F>(&self, change: F) -> Result<(), MachineError>
    where
        F: FnOnce(&mut Definitions<M>) -> Result<(), BuildError>,
    {
        let mut current = self.definitions.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Definitions::clone(&current);
        change(&mut next)?;
        *current = Arc::new(next);
        Ok(())
    }

    pub(crate) fn slot(&self, id: ModelId) -> Result<Arc<ModelSlot<M>>, MachineError> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|slot| slot.id == id)
            .cloned()
            .ok_or(MachineError::UnknownModel(id))
    }

    pub(crate) fn slots(&self) -> Vec<Arc<ModelSlot<M>>> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn name(&self) -> String {
        self.definitions().options.name.clone()
    }

    pub(crate) fn attach(&self, attach: Attach<M>) -> Result<ModelId, MachineError> {
        let definitions = self.definitions();
        let initial = if attach.initial.is_empty() {
            definitions.options.initial.clone()
        } else {
            attach.initial
        };
        if initial.is_empty() {
            return Err(BuildError::MissingInitialState.into());
        }
        let tree = initial_tree(&initial, &definitions.states)?;
        let slot = ModelSlot::new(
            attach.model,
            attach.callbacks,
            tree,
            definitions.options.history_limit,
        );
        let id = slot.id;
        tracing::debug!(
            machine = %definitions.options.name,
            model = %id,
            states = ?slot.tree().leaves(definitions.states.separator()),
            "attached model"
        );
        self.models
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(slot));
        Ok(id)
    }

    /// Detach a model. Its queued triggers are dropped.
    pub(crate) fn detach(&self, id: ModelId) -> bool {
        let mut models = self.models.write().unwrap_or_else(PoisonError::into_inner);
        match models.iter().position(|slot| slot.id == id) {
            Some(index) => {
                let slot = models.remove(index);
                slot.admission.clear();
                true
            }
            None => false,
        }
    }

    pub(crate) fn model_ids(&self) -> Vec<ModelId> {
        self.slots().iter().map(|slot| slot.id).collect()
    }

    pub(crate) fn model(&self, id: ModelId) -> Option<Arc<M>> {
        self.slot(id).ok().map(|slot| Arc::clone(&slot.model))
    }

    pub(crate) fn state(&self, id: ModelId) -> Result<Vec<String>, MachineError> {
        let slot = self.slot(id)?;
        Ok(slot.tree().leaves(self.definitions().states.separator()))
    }

    pub(crate) fn state_tree(&self, id: ModelId) -> Result<StateTree, MachineError> {
        Ok(self.slot(id)?.tree())
    }

    pub(crate) fn is_state(
        &self,
        id: ModelId,
        name: &str,
        allow_substates: bool,
    ) -> Result<bool, MachineError> {
        let separator = self.definitions().states.separator().to_string();
        let prefix = format!("{name}{separator}");
        Ok(self.state(id)?.iter().any(|leaf| {
            leaf == name || (allow_substates && leaf.starts_with(&prefix))
        }))
    }

    /// Force a model into the given states without running any callback.
    pub(crate) fn set_state(&self, id: ModelId, names: &[&str]) -> Result<(), MachineError> {
        let slot = self.slot(id)?;
        let names: Vec<String> = names.iter().map(|name| name.to_string()).collect();
        let tree = initial_tree(&names, &self.definitions().states)?;
        slot.set_tree(tree);
        Ok(())
    }

    pub(crate) fn get_state(&self, name: &str) -> Option<Arc<State<M>>> {
        self.definitions().states.get(name).cloned()
    }

    pub(crate) fn add_state(&self, state: StateBuilder<M>) -> Result<(), MachineError> {
        self.update(|definitions| {
            let separator = definitions.states.separator().to_string();
            validation::into_result(validation::validate_declarations(
                std::slice::from_ref(&state),
                &separator,
            ))?;
            let (states, transitions) = state.flatten(None, &separator);
            definitions.register_states(states)?;
            definitions.register_transitions(transitions)
        })
    }

    pub(crate) fn add_transition(&self, transition: TransitionBuilder<M>) -> Result<(), MachineError> {
        self.update(|definitions| definitions.register_transitions(vec![transition]))
    }

    pub(crate) fn on_enter(&self, state: &str, callback: Callback<M>) -> Result<(), MachineError> {
        self.update(|definitions| {
            definitions
                .states
                .update(state, |state| state.on_enter.push(callback))
        })
    }

    pub(crate) fn on_exit(&self, state: &str, callback: Callback<M>) -> Result<(), MachineError> {
        self.update(|definitions| {
            definitions
                .states
                .update(state, |state| state.on_exit.push(callback))
        })
    }

    pub(crate) fn triggers(&self) -> Vec<String> {
        self.definitions()
            .events
            .triggers()
            .map(str::to_string)
            .collect()
    }

    /// Triggers with at least one transition from an active state or one of
    /// its ancestors.
    pub(crate) fn triggers_for(&self, id: ModelId) -> Result<Vec<String>, MachineError> {
        let slot = self.slot(id)?;
        let definitions = self.definitions();
        let separator = definitions.states.separator();
        let sources: Vec<String> = slot
            .tree()
            .resolve_order()
            .iter()
            .map(|path| path.join(separator))
            .collect();
        Ok(definitions
            .events
            .triggers()
            .filter(|trigger| {
                sources
                    .iter()
                    .any(|source| !definitions.events.candidates(trigger, source).is_empty())
            })
            .map(str::to_string)
            .collect())
    }

    pub(crate) fn history(&self, id: ModelId) -> Result<History, MachineError> {
        Ok(self.slot(id)?.history())
    }

    pub(crate) fn pending(&self, id: ModelId) -> Result<usize, MachineError> {
        Ok(self.slot(id)?.admission.pending())
    }

    /// Plan the commit of `dest` against the model's current tree.
    pub(crate) fn plan(
        definitions: &Definitions<M>,
        slot: &ModelSlot<M>,
        dest: &str,
    ) -> Result<Resolution, MachineError> {
        resolve(&slot.tree(), dest, &definitions.states)
    }
}

/// Generates the model and definition management API on a machine type
/// holding a `core: MachineCore<M>` field.
macro_rules! delegate_core {
    ($machine:ident) => {
        impl<M: Send + Sync + 'static> $machine<M> {
            /// Machine name used in logs and error messages.
            pub fn name(&self) -> String {
                self.core.name()
            }

            /// Attach a model and place it in its initial state.
            ///
            /// No callbacks run; the model starts in the initial state and
            /// every nested or parallel default below it.
            pub fn attach(&self, attach: $crate::Attach<M>) -> Result<$crate::ModelId, $crate::MachineError> {
                self.core.attach(attach)
            }

            /// Attach a model with the machine's initial state and no
            /// model-level callbacks.
            pub fn add_model(&self, model: impl Into<std::sync::Arc<M>>) -> Result<$crate::ModelId, $crate::MachineError> {
                self.core.attach($crate::Attach::new(model))
            }

            /// Detach a model and drop its queued triggers.
            pub fn remove_model(&self, model: $crate::ModelId) -> bool {
                self.core.detach(model)
            }

            pub fn models(&self) -> Vec<$crate::ModelId> {
                self.core.model_ids()
            }

            pub fn model(&self, model: $crate::ModelId) -> Option<std::sync::Arc<M>> {
                self.core.model(model)
            }

            /// Qualified names of the model's active leaves.
            pub fn state(&self, model: $crate::ModelId) -> Result<Vec<String>, $crate::MachineError> {
                self.core.state(model)
            }

            pub fn state_tree(&self, model: $crate::ModelId) -> Result<$crate::core::StateTree, $crate::MachineError> {
                self.core.state_tree(model)
            }

            /// Whether `name` is an active leaf, or with `allow_substates`
            /// an active ancestor of one.
            pub fn is_state(
                &self,
                model: $crate::ModelId,
                name: &str,
                allow_substates: bool,
            ) -> Result<bool, $crate::MachineError> {
                self.core.is_state(model, name, allow_substates)
            }

            /// Force the model into the given states without running
            /// callbacks.
            pub fn set_state(&self, model: $crate::ModelId, names: &[&str]) -> Result<(), $crate::MachineError> {
                self.core.set_state(model, names)
            }

            pub fn get_state(&self, name: &str) -> Option<std::sync::Arc<$crate::core::State<M>>> {
                self.core.get_state(name)
            }

            /// Register a state at runtime. It is visible to triggers that
            /// start afterwards.
            pub fn add_state(&self, state: $crate::builder::StateBuilder<M>) -> Result<(), $crate::MachineError> {
                self.core.add_state(state)
            }

            /// Register a transition at runtime.
            pub fn add_transition(
                &self,
                transition: $crate::builder::TransitionBuilder<M>,
            ) -> Result<(), $crate::MachineError> {
                self.core.add_transition(transition)
            }

            pub fn on_enter(&self, state: &str, callback: $crate::core::Callback<M>) -> Result<(), $crate::MachineError> {
                self.core.on_enter(state, callback)
            }

            pub fn on_exit(&self, state: &str, callback: $crate::core::Callback<M>) -> Result<(), $crate::MachineError> {
                self.core.on_exit(state, callback)
            }

            /// Every registered trigger name.
            pub fn triggers(&self) -> Vec<String> {
                self.core.triggers()
            }

            /// Triggers that have a transition from the model's active states.
            pub fn triggers_for(&self, model: $crate::ModelId) -> Result<Vec<String>, $crate::MachineError> {
                self.core.triggers_for(model)
            }

            pub fn history(&self, model: $crate::ModelId) -> Result<$crate::core::History, $crate::MachineError> {
                self.core.history(model)
            }

            /// Triggers queued behind the one currently running.
            pub fn pending(&self, model: $crate::ModelId) -> Result<usize, $crate::MachineError> {
                self.core.pending(model)
            }
        }
    };
}

pub(crate) use delegate_core;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_marks_ancestors() {
        let mut resolved = Resolved::default();
        let path = vec!["C".to_string(), "1".to_string(), "a".to_string()];

        resolved.mark(&path, "_");

        assert!(resolved.contains("C_1_a"));
        assert!(resolved.contains("C_1"));
        assert!(resolved.contains("C"));
        assert!(!resolved.contains("C_2"));
    }

    #[test]
    fn label_prefixes_named_machines() {
        let mut options = MachineOptions::default();
        assert_eq!(options.label(), "");

        options.name = "door".to_string();
        assert_eq!(options.label(), "door: ");
    }
}
