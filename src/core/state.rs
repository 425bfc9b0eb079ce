//! State definitions, aspects and the per-state pocket.

use super::callback::Callback;
use crate::engine::EventData;
use crate::error::CallbackResult;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// A declared state.
///
/// The qualified name joins every ancestor segment with the machine's
/// separator. Composite states list their child segments in declaration
/// order; a parallel composite activates all of them at once.
pub struct State<M> {
    pub(crate) name: String,
    pub(crate) children: Vec<String>,
    pub(crate) initial: Vec<String>,
    pub(crate) parallel: bool,
    pub(crate) is_final: bool,
    pub(crate) ignore_invalid_triggers: Option<bool>,
    pub(crate) on_enter: Vec<Callback<M>>,
    pub(crate) on_exit: Vec<Callback<M>>,
    pub(crate) aspects: Vec<Arc<dyn StateAspect<M>>>,
    pub(crate) pocket: Arc<Pocket>,
}

impl<M> Clone for State<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            children: self.children.clone(),
            initial: self.initial.clone(),
            parallel: self.parallel,
            is_final: self.is_final,
            ignore_invalid_triggers: self.ignore_invalid_triggers,
            on_enter: self.on_enter.clone(),
            on_exit: self.on_exit.clone(),
            aspects: self.aspects.clone(),
            pocket: Arc::clone(&self.pocket),
        }
    }
}

impl<M> fmt::Debug for State<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("name", &self.name)
            .field("children", &self.children)
            .field("initial", &self.initial)
            .field("parallel", &self.parallel)
            .field("is_final", &self.is_final)
            .finish_non_exhaustive()
    }
}

impl<M> State<M> {
    pub(crate) fn new(name: impl Into<String>) -> Self {
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
            pocket: Arc::new(Pocket::default()),
        }
    }

    /// Qualified name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Child segments in declaration order.
    pub fn children(&self) -> &[String] {
        &self.children
    }

    pub fn is_composite(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// State-level override of the machine's invalid trigger policy.
    pub fn ignore_invalid_triggers(&self) -> Option<bool> {
        self.ignore_invalid_triggers
    }

    /// Child segments entered when this state is entered without an explicit
    /// sub-path.
    pub fn initial(&self) -> Vec<String> {
        if self.parallel {
            self.children.clone()
        } else {
            self.initial.clone()
        }
    }

    pub fn on_enter(&self) -> &[Callback<M>] {
        &self.on_enter
    }

    pub fn on_exit(&self) -> &[Callback<M>] {
        &self.on_exit
    }

    pub fn aspects(&self) -> &[Arc<dyn StateAspect<M>>] {
        &self.aspects
    }

    pub fn pocket(&self) -> &Pocket {
        &self.pocket
    }
}

/// An independent piece of behavior attached to a state.
///
/// Aspects observe the same enter/exit notifications as the state's own
/// callbacks and run before them, in the order they were attached. Tags,
/// timeouts and scratch scopes are built this way without touching the
/// dispatch pipeline.
pub trait StateAspect<M>: Send + Sync {
    fn on_enter(&self, _state: &State<M>, _event: &EventData<M>) -> CallbackResult {
        Ok(())
    }

    fn on_exit(&self, _state: &State<M>, _event: &EventData<M>) -> CallbackResult {
        Ok(())
    }
}

type Payload = Arc<dyn Any + Send + Sync>;

/// Ephemeral payload slot owned by a state.
///
/// Enter-side code stores a value that stays readable for as long as the
/// state is occupied, including from the state's own exit callbacks. The
/// engine empties the slot right after those exit callbacks finish.
/// Internal transitions never touch it.
///
/// # Example
///
/// ```rust
/// use canopy::core::Pocket;
///
/// let pocket = Pocket::default();
/// assert!(pocket.is_empty());
///
/// pocket.set(String::from("draft"));
/// assert_eq!(pocket.get::<String>().as_deref(), Some(&String::from("draft")));
/// assert!(pocket.get::<u32>().is_none());
/// ```
#[derive(Default)]
pub struct Pocket {
    slot: Mutex<Option<Payload>>,
}

impl fmt::Debug for Pocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pocket")
            .field("occupied", &!self.is_empty())
            .finish()
    }
}

impl Pocket {
    /// Store an owned value.
    pub fn set<T: Any + Send + Sync>(&self, value: T) {
        let value: Payload = Arc::new(value);
        self.put(Some(value));
    }

    /// Store a shared value. [`get`](Pocket::get) hands back the same `Arc`.
    pub fn set_shared<T: Any + Send + Sync>(&self, value: Arc<T>) {
        let value: Payload = value;
        self.put(Some(value));
    }

    /// The stored value if it has type `T`.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.get_any().and_then(|value| value.downcast::<T>().ok())
    }

    pub fn get_any(&self) -> Option<Payload> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    pub(crate) fn clear(&self) {
        self.put(None);
    }

    fn put(&self, value: Option<Payload>) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Model;

    #[test]
    fn pocket_starts_empty() {
        let pocket = Pocket::default();
        assert!(pocket.is_empty());
        assert!(pocket.get_any().is_none());
    }

    #[test]
    fn pocket_holds_mappings() {
        let pocket = Pocket::default();
        let mut map = HashMap::new();
        map.insert("k", 1);
        pocket.set(map.clone());

        assert_eq!(pocket.get::<HashMap<&str, i32>>().as_deref(), Some(&map));
    }

    #[test]
    fn shared_values_keep_identity() {
        let pocket = Pocket::default();
        let value = Arc::new(vec![1, 2, 3]);
        pocket.set_shared(Arc::clone(&value));

        let stored = pocket.get::<Vec<i32>>().unwrap();
        assert!(Arc::ptr_eq(&stored, &value));
    }

    #[test]
    fn clear_empties_slot() {
        let pocket = Pocket::default();
        pocket.set(5u8);
        pocket.clear();
        assert!(pocket.is_empty());
    }

    #[test]
    fn cloned_state_shares_pocket() {
        let state: State<Model> = State::new("A");
        let copy = state.clone();
        state.pocket().set(7u32);

        assert_eq!(copy.pocket().get::<u32>().as_deref(), Some(&7));
    }

    #[test]
    fn parallel_state_enters_every_child() {
        let mut state: State<Model> = State::new("C");
        state.children = vec!["1".into(), "2".into()];
        state.parallel = true;

        assert_eq!(state.initial(), vec!["1", "2"]);
        assert!(state.is_composite());
    }
}
