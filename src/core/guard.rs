//! Conditions gating a transition.
//!
//! A transition carries an ordered list of conditions. They are checked with
//! short-circuit AND: the first one that does not hold rejects the candidate
//! and the next candidate for the same source is tried.

use super::callback::Predicate;
use crate::engine::EventData;
use crate::error::MachineError;

/// A predicate paired with the value it must produce.
///
/// # Example
///
/// ```rust
/// use canopy::core::{Condition, Predicate};
///
/// struct Job;
///
/// let ready: Condition<Job> = Condition::when(Predicate::named("is_ready"));
/// let not_locked: Condition<Job> = Condition::unless(Predicate::named("is_locked"));
///
/// assert!(ready.expected());
/// assert!(!not_locked.expected());
/// ```
pub struct Condition<M> {
    predicate: Predicate<M>,
    expected: bool,
}

impl<M> Clone for Condition<M> {
    fn clone(&self) -> Self {
        Self {
            predicate: self.predicate.clone(),
            expected: self.expected,
        }
    }
}

impl<M> std::fmt::Debug for Condition<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Condition")
            .field("predicate", &self.predicate)
            .field("expected", &self.expected)
            .finish()
    }
}

impl<M> Condition<M> {
    /// Holds when the predicate returns `true`.
    pub fn when(predicate: impl Into<Predicate<M>>) -> Self {
        Self {
            predicate: predicate.into(),
            expected: true,
        }
    }

    /// Holds when the predicate returns `false`.
    pub fn unless(predicate: impl Into<Predicate<M>>) -> Self {
        Self {
            predicate: predicate.into(),
            expected: false,
        }
    }

    pub fn expected(&self) -> bool {
        self.expected
    }

    pub fn predicate(&self) -> &Predicate<M> {
        &self.predicate
    }

    pub(crate) fn check_sync(&self, event: &EventData<M>) -> Result<bool, MachineError> {
        Ok(self.predicate.eval_sync(event)? == self.expected)
    }

    pub(crate) async fn check(&self, event: &EventData<M>) -> Result<bool, MachineError> {
        Ok(self.predicate.eval(event).await? == self.expected)
    }
}
