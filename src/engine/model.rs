//! Attached models and their per-model runtime state.

use super::scheduler::Admission;
use crate::core::{Callback, CallbackTable, History, Predicate, StateTree, TransitionRecord};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Handle identifying a model attached to a machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelId(Uuid);

impl ModelId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request to attach a model.
///
/// # Example
///
/// ```rust
/// use canopy::{Attach, Callback};
///
/// #[derive(Default)]
/// struct Light;
///
/// let request = Attach::<Light>::new(Light::default())
///     .initial("off")
///     .callback("on_enter_on", Callback::new(|_| Ok(())));
/// # let _ = request;
/// ```
pub struct Attach<M> {
    pub(crate) model: Arc<M>,
    pub(crate) initial: Vec<String>,
    pub(crate) callbacks: CallbackTable<M>,
}

impl<M> Attach<M> {
    pub fn new(model: impl Into<Arc<M>>) -> Self {
        Self {
            model: model.into(),
            initial: Vec::new(),
            callbacks: CallbackTable::new(),
        }
    }

    /// Start in this state instead of the machine's initial state. Call
    /// more than once to start in several states at once.
    pub fn initial(mut self, state: impl Into<String>) -> Self {
        self.initial.push(state.into());
        self
    }

    /// Named callbacks owned by this model. They shadow the machine's.
    pub fn callbacks(mut self, table: CallbackTable<M>) -> Self {
        self.callbacks = table;
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
}

/// Runtime state owned by one attached model.
pub(crate) struct ModelSlot<M> {
    pub(crate) id: ModelId,
    pub(crate) model: Arc<M>,
    pub(crate) callbacks: CallbackTable<M>,
    pub(crate) admission: Admission,
    /// Held from `before_state_change` until `after_state_change` returns.
    pub(crate) commit: tokio::sync::Mutex<()>,
    tree: Mutex<StateTree>,
    history: Mutex<Option<History>>,
}

impl<M> ModelSlot<M> {
    pub(crate) fn new(
        model: Arc<M>,
        callbacks: CallbackTable<M>,
        tree: StateTree,
        history_limit: Option<usize>,
    ) -> Self {
        Self {
            id: ModelId::new(),
            model,
            callbacks,
            admission: Admission::default(),
            commit: tokio::sync::Mutex::new(()),
            tree: Mutex::new(tree),
            history: Mutex::new(history_limit.map(History::bounded)),
        }
    }

    pub(crate) fn tree(&self) -> StateTree {
        self.tree
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn is_active(&self, path: &[String]) -> bool {
        self.tree
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }

    /// Replace the tree without running callbacks.
    pub(crate) fn set_tree(&self, tree: StateTree) {
        *self.tree.lock().unwrap_or_else(PoisonError::into_inner) = tree;
    }

    /// Replace the tree as part of a transition and record it.
    pub(crate) fn commit_tree(&self, tree: StateTree, trigger: &str, separator: &str) {
        let from = {
            let mut current = self.tree.lock().unwrap_or_else(PoisonError::into_inner);
            let from = current.leaves(separator);
            *current = tree.clone();
            from
        };
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(history) = history.as_mut() {
            history.record(TransitionRecord {
                trigger: trigger.to_string(),
                from,
                to: tree.leaves(separator),
                timestamp: Utc::now(),
            });
        }
    }

    pub(crate) fn history(&self) -> History {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_default()
    }
}
