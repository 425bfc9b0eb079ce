//! Builder for constructing transitions.

use crate::builder::error::BuildError;
use crate::core::{Callback, Condition, Predicate, Source, Target, Transition};
use crate::engine::EventData;

/// Builder for one trigger's transitions with a fluent API.
///
/// Listing several sources builds one transition per source, all sharing
/// the same target, conditions and callbacks.
///
/// # Example
///
/// ```rust
/// use canopy::TransitionBuilder;
///
/// struct Order {
///     paid: bool,
/// }
///
/// let ship = TransitionBuilder::<Order>::new("ship")
///     .from("packed")
///     .from("waiting")
///     .to("shipped")
///     .when(|event| event.model().paid);
/// # let _ = ship;
/// ```
pub struct TransitionBuilder<M> {
    trigger: String,
    sources: Vec<Source>,
    target: Option<Target>,
    conditions: Vec<Condition<M>>,
    prepare: Vec<Callback<M>>,
    before: Vec<Callback<M>>,
    after: Vec<Callback<M>>,
}

impl<M: 'static> TransitionBuilder<M> {
    pub fn new(trigger: impl Into<String>) -> Self {
        Self {
            trigger: trigger.into(),
            sources: Vec::new(),
            target: None,
            conditions: Vec::new(),
            prepare: Vec::new(),
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    /// Add a source state. Call more than once for several sources.
    pub fn from(mut self, state: impl Into<String>) -> Self {
        self.sources.push(Source::State(state.into()));
        self
    }

    /// Fire from whichever state is active.
    pub fn from_any(mut self) -> Self {
        self.sources.push(Source::Any);
        self
    }

    pub fn to(mut self, state: impl Into<String>) -> Self {
        self.target = Some(Target::State(state.into()));
        self
    }

    /// Exit and re-enter the source state.
    pub fn reflexive(mut self) -> Self {
        self.target = Some(Target::Reflexive);
        self
    }

    /// Run the transition's callbacks without leaving the source state.
    pub fn internal(mut self) -> Self {
        self.target = Some(Target::Internal);
        self
    }

    /// Require the closure to return `true`.
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&EventData<M>) -> bool + Send + Sync + 'static,
    {
        self.conditions.push(Condition::when(Predicate::new(predicate)));
        self
    }

    /// Require the closure to return `false`.
    pub fn unless<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&EventData<M>) -> bool + Send + Sync + 'static,
    {
        self.conditions.push(Condition::unless(Predicate::new(predicate)));
        self
    }

    pub fn condition(mut self, condition: Condition<M>) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn prepare(mut self, callback: impl Into<Callback<M>>) -> Self {
        self.prepare.push(callback.into());
        self
    }

    pub fn before(mut self, callback: impl Into<Callback<M>>) -> Self {
        self.before.push(callback.into());
        self
    }

    pub fn after(mut self, callback: impl Into<Callback<M>>) -> Self {
        self.after.push(callback.into());
        self
    }

    /// Build one transition per source.
    pub fn build(self) -> Result<Vec<Transition<M>>, BuildError> {
        if self.trigger.is_empty() {
            return Err(BuildError::MissingTrigger);
        }
        if self.sources.is_empty() {
            return Err(BuildError::MissingFromState);
        }
        let target = self.target.ok_or(BuildError::MissingToState)?;

        Ok(self
            .sources
            .into_iter()
            .map(|source| {
                let mut transition = Transition::new(self.trigger.clone(), source, target.clone());
                transition.conditions = self.conditions.clone();
                transition.prepare = self.prepare.clone();
                transition.before = self.before.clone();
                transition.after = self.after.clone();
                transition
            })
            .collect())
    }

    /// Make state names relative to `scope`. A wildcard source becomes the
    /// scope itself, which every substate reaches through bubbling.
    pub(crate) fn qualify(mut self, scope: &str, separator: &str) -> Self {
        let prefix = |name: String| format!("{scope}{separator}{name}");
        self.sources = self
            .sources
            .into_iter()
            .map(|source| match source {
                Source::Any => Source::State(scope.to_string()),
                Source::State(name) => Source::State(prefix(name)),
            })
            .collect();
        self.target = self.target.map(|target| match target {
            Target::State(name) => Target::State(prefix(name)),
            other => other,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Model;

    #[test]
    fn builder_validates_required_fields() {
        let missing_target = TransitionBuilder::<Model>::new("go").from("A").build();
        let missing_source = TransitionBuilder::<Model>::new("go").to("B").build();
        let missing_trigger = TransitionBuilder::<Model>::new("").from("A").to("B").build();

        assert!(matches!(missing_target, Err(BuildError::MissingToState)));
        assert!(matches!(missing_source, Err(BuildError::MissingFromState)));
        assert!(matches!(missing_trigger, Err(BuildError::MissingTrigger)));
    }

    #[test]
    fn one_transition_per_source() {
        let transitions = TransitionBuilder::<Model>::new("go")
            .from("A")
            .from("B")
            .to("C")
            .when(|_| true)
            .build()
            .unwrap();

        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[1].source(), &Source::State("B".into()));
        assert_eq!(transitions[1].conditions().len(), 1);
    }

    #[test]
    fn qualify_prefixes_scope() {
        let transitions = TransitionBuilder::<Model>::new("step")
            .from("a")
            .from_any()
            .to("b")
            .qualify("C_1", "_")
            .build()
            .unwrap();

        assert_eq!(transitions[0].source(), &Source::State("C_1_a".into()));
        assert_eq!(transitions[1].source(), &Source::State("C_1".into()));
        assert_eq!(transitions[0].target(), &Target::State("C_1_b".into()));
    }

    #[test]
    fn internal_and_reflexive_targets() {
        let internal = TransitionBuilder::<Model>::new("poke").from("A").internal().build().unwrap();
        let again = TransitionBuilder::<Model>::new("again").from("A").reflexive().build().unwrap();

        assert!(internal[0].is_internal());
        assert_eq!(again[0].target(), &Target::Reflexive);
    }
}
