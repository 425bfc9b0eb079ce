//! Builder for nested state declarations.

use crate::builder::transition::TransitionBuilder;
use crate::core::{Callback, State, StateAspect};
use std::sync::Arc;

/// Declares a state together with its substates.
///
/// Child names are relative to their parent; the machine joins them with its
/// separator, so a child `1` of `A` is registered as `A_1`.
///
/// # Example
///
/// ```rust
/// use canopy::{StateBuilder, TransitionBuilder};
///
/// struct Robot;
///
/// let working = StateBuilder::<Robot>::new("working")
///     .parallel()
///     .child(StateBuilder::new("arm").children(["idle", "moving"]).initial("idle"))
///     .child(StateBuilder::new("camera").children(["off", "on"]).initial("off"))
///     .transition(TransitionBuilder::new("halt").from_any().to("arm_idle"));
/// # let _ = working;
/// ```
pub struct StateBuilder<M> {
    pub(crate) name: String,
    pub(crate) children: Vec<StateBuilder<M>>,
    pub(crate) initial: Vec<String>,
    pub(crate) parallel: bool,
    is_final: bool,
    ignore_invalid_triggers: Option<bool>,
    on_enter: Vec<Callback<M>>,
    on_exit: Vec<Callback<M>>,
    aspects: Vec<Arc<dyn StateAspect<M>>>,
    transitions: Vec<TransitionBuilder<M>>,
}

impl<M: 'static> StateBuilder<M> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
            initial: Vec::new(),
            parallel: false,
            is_final: false,
            ignore_invalid_triggers: None,
            on_enter: Vec::new(),
            on_exit: Vec::new(),
            aspects: Vec::new(),
            transitions: Vec::new(),
        }
    }

    pub fn child(mut self, child: StateBuilder<M>) -> Self {
        self.children.push(child);
        self
    }

    /// Add plain children by name.
    pub fn children<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.children
            .extend(names.into_iter().map(StateBuilder::new));
        self
    }

    /// Child entered by default. Ignored for parallel states, which enter
    /// every child.
    pub fn initial(mut self, child: impl Into<String>) -> Self {
        self.initial.push(child.into());
        self
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    pub fn final_state(mut self) -> Self {
        self.is_final = true;
        self
    }

    /// Override the machine's setting while this state is active.
    pub fn ignore_invalid_triggers(mut self, ignore: bool) -> Self {
        self.ignore_invalid_triggers = Some(ignore);
        self
    }

    pub fn on_enter(mut self, callback: impl Into<Callback<M>>) -> Self {
        self.on_enter.push(callback.into());
        self
    }

    pub fn on_exit(mut self, callback: impl Into<Callback<M>>) -> Self {
        self.on_exit.push(callback.into());
        self
    }

    /// Attach reusable enter/exit behavior.
    pub fn aspect(mut self, aspect: impl StateAspect<M> + 'static) -> Self {
        self.aspects.push(Arc::new(aspect));
        self
    }

    /// Transition whose state names are relative to this state.
    pub fn transition(mut self, transition: TransitionBuilder<M>) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Qualified states in declaration order, parents before children, and
    /// the scoped transitions rewritten to qualified names.
    pub(crate) fn flatten(
        self,
        parent: Option<&str>,
        separator: &str,
    ) -> (Vec<State<M>>, Vec<TransitionBuilder<M>>) {
        let qualified = match parent {
            Some(parent) => format!("{parent}{separator}{}", self.name),
            None => self.name,
        };

        let mut state = State::new(qualified.clone());
        state.initial = self.initial;
        state.parallel = self.parallel;
        state.is_final = self.is_final;
        state.ignore_invalid_triggers = self.ignore_invalid_triggers;
        state.on_enter = self.on_enter;
        state.on_exit = self.on_exit;
        state.aspects = self.aspects;

        let mut states = vec![state];
        let mut transitions: Vec<TransitionBuilder<M>> = self
            .transitions
            .into_iter()
            .map(|transition| transition.qualify(&qualified, separator))
            .collect();

        for child in self.children {
            let (nested, scoped) = child.flatten(Some(&qualified), separator);
            states.extend(nested);
            transitions.extend(scoped);
        }
        (states, transitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Model;

    #[test]
    fn flatten_qualifies_children_in_preorder() {
        let builder = StateBuilder::<Model>::new("C")
            .parallel()
            .child(StateBuilder::new("1").children(["a", "b"]).initial("a"))
            .child(StateBuilder::new("2").children(["a"]));

        let (states, _) = builder.flatten(None, "_");
        let names: Vec<_> = states.iter().map(|state| state.name().to_string()).collect();

        assert_eq!(names, vec!["C", "C_1", "C_1_a", "C_1_b", "C_2", "C_2_a"]);
        assert!(states[0].is_parallel());
        assert_eq!(states[1].initial(), vec!["a".to_string()]);
    }

    #[test]
    fn flatten_scopes_transitions() {
        let builder = StateBuilder::<Model>::new("door")
            .children(["open", "closed"])
            .transition(TransitionBuilder::new("shut").from("open").to("closed"));

        let (_, transitions) = builder.flatten(Some("house"), "_");
        let built = transitions.into_iter().next().unwrap().build().unwrap();

        assert_eq!(
            built[0].destination("house_door_open").as_deref(),
            Some("house_door_closed")
        );
    }
}
