//! Callbacks, predicates and the late-binding lookup table.
//!
//! A callback is either a closure or a name. Names are resolved each time
//! they run, first against the table the model was attached with and then
//! against the machine's own table, so hosts can register behavior after a
//! machine has been configured.

use crate::engine::{Arguments, EventData};
use crate::error::{BoxError, CallbackResult, MachineError, Phase};
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type SyncCallbackFn<M> = dyn Fn(&EventData<M>) -> CallbackResult + Send + Sync;
type AsyncCallbackFn<M> =
    dyn for<'a> Fn(&'a EventData<M>) -> BoxFuture<'a, CallbackResult> + Send + Sync;
type SyncPredicateFn<M> = dyn Fn(&EventData<M>) -> Result<bool, BoxError> + Send + Sync;
type AsyncPredicateFn<M> =
    dyn for<'a> Fn(&'a EventData<M>) -> BoxFuture<'a, Result<bool, BoxError>> + Send + Sync;

/// A unit of user code run at one pipeline phase.
///
/// # Example
///
/// ```rust
/// use canopy::core::Callback;
///
/// struct Door;
///
/// let log: Callback<Door> = Callback::new(|event| {
///     println!("{} fired", event.trigger());
///     Ok(())
/// });
/// let by_name: Callback<Door> = "on_opened".into();
/// assert_eq!(by_name.name(), Some("on_opened"));
/// assert_eq!(log.name(), None);
/// ```
pub enum Callback<M> {
    Sync(Arc<SyncCallbackFn<M>>),
    Async(Arc<AsyncCallbackFn<M>>),
    Named(String),
}

impl<M> Clone for Callback<M> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(f) => Self::Sync(Arc::clone(f)),
            Self::Async(f) => Self::Async(Arc::clone(f)),
            Self::Named(name) => Self::Named(name.clone()),
        }
    }
}

impl<M> fmt::Debug for Callback<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Callback::Sync"),
            Self::Async(_) => f.write_str("Callback::Async"),
            Self::Named(name) => write!(f, "Callback::Named({name})"),
        }
    }
}

impl<M: 'static> Callback<M> {
    /// Callback receiving the full event context.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&EventData<M>) -> CallbackResult + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Callback receiving only the model and the trigger arguments.
    pub fn raw<F>(f: F) -> Self
    where
        F: Fn(&M, &Arguments) -> CallbackResult + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(move |event: &EventData<M>| f(event.model(), event.args())))
    }

    /// Asynchronous callback. Only [`AsyncMachine`](crate::AsyncMachine) can run it.
    pub fn future<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a EventData<M>) -> BoxFuture<'a, CallbackResult> + Send + Sync + 'static,
    {
        Self::Async(Arc::new(f))
    }

    /// Callback resolved by name when it runs.
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }
}

impl<M> Callback<M> {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name),
            _ => None,
        }
    }

    fn resolve(&self, event: &EventData<M>) -> Result<Callback<M>, MachineError> {
        match self {
            Self::Named(name) => event.lookup_callback(name),
            other => Ok(other.clone()),
        }
    }

    pub(crate) fn call_sync(&self, event: &EventData<M>, phase: Phase) -> Result<(), MachineError> {
        match self.resolve(event)? {
            Self::Sync(f) => f(event).map_err(|err| lift(phase, err)),
            Self::Async(_) => Err(MachineError::AsyncCallback { phase }),
            Self::Named(name) => Err(MachineError::CallbackNotFound(name)),
        }
    }

    pub(crate) async fn call(&self, event: &EventData<M>, phase: Phase) -> Result<(), MachineError> {
        match self.resolve(event)? {
            Self::Sync(f) => f(event).map_err(|err| lift(phase, err)),
            Self::Async(f) => f(event).await.map_err(|err| lift(phase, err)),
            Self::Named(name) => Err(MachineError::CallbackNotFound(name)),
        }
    }
}

impl<M> From<&str> for Callback<M> {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl<M> From<String> for Callback<M> {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

/// Run callbacks in order, stopping at the first failure.
pub(crate) fn run_sync<M>(
    callbacks: &[Callback<M>],
    event: &EventData<M>,
    phase: Phase,
) -> Result<(), MachineError> {
    callbacks
        .iter()
        .try_for_each(|callback| callback.call_sync(event, phase))
}

pub(crate) async fn run_async<M>(
    callbacks: &[Callback<M>],
    event: &EventData<M>,
    phase: Phase,
) -> Result<(), MachineError> {
    for callback in callbacks {
        callback.call(event, phase).await?;
    }
    Ok(())
}

/// Keeps engine errors raised from inside user code, such as a rejected
/// reentrant trigger, instead of wrapping them a second time.
pub(crate) fn lift(phase: Phase, err: BoxError) -> MachineError {
    match err.downcast::<MachineError>() {
        Ok(inner) => *inner,
        Err(other) => MachineError::callback(phase, other),
    }
}

/// A boolean test over the event context.
pub enum Predicate<M> {
    Sync(Arc<SyncPredicateFn<M>>),
    Async(Arc<AsyncPredicateFn<M>>),
    Named(String),
}

impl<M> Clone for Predicate<M> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(f) => Self::Sync(Arc::clone(f)),
            Self::Async(f) => Self::Async(Arc::clone(f)),
            Self::Named(name) => Self::Named(name.clone()),
        }
    }
}

impl<M> fmt::Debug for Predicate<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Predicate::Sync"),
            Self::Async(_) => f.write_str("Predicate::Async"),
            Self::Named(name) => write!(f, "Predicate::Named({name})"),
        }
    }
}

impl<M: 'static> Predicate<M> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&EventData<M>) -> bool + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(move |event: &EventData<M>| Ok(f(event))))
    }

    /// Predicate that may fail. A failure rejects the candidate transition.
    pub fn fallible<F>(f: F) -> Self
    where
        F: Fn(&EventData<M>) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    pub fn future<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a EventData<M>) -> BoxFuture<'a, Result<bool, BoxError>>
            + Send
            + Sync
            + 'static,
    {
        Self::Async(Arc::new(f))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }
}

impl<M> Predicate<M> {
    fn resolve(&self, event: &EventData<M>) -> Result<Predicate<M>, MachineError> {
        match self {
            Self::Named(name) => event.lookup_predicate(name),
            other => Ok(other.clone()),
        }
    }

    pub(crate) fn eval_sync(&self, event: &EventData<M>) -> Result<bool, MachineError> {
        match self.resolve(event)? {
            Self::Sync(f) => f(event).map_err(|err| lift(Phase::Condition, err)),
            Self::Async(_) => Err(MachineError::AsyncCallback {
                phase: Phase::Condition,
            }),
            Self::Named(name) => Err(MachineError::CallbackNotFound(name)),
        }
    }

    pub(crate) async fn eval(&self, event: &EventData<M>) -> Result<bool, MachineError> {
        match self.resolve(event)? {
            Self::Sync(f) => f(event).map_err(|err| lift(Phase::Condition, err)),
            Self::Async(f) => f(event).await.map_err(|err| lift(Phase::Condition, err)),
            Self::Named(name) => Err(MachineError::CallbackNotFound(name)),
        }
    }
}

impl<M> From<&str> for Predicate<M> {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl<M> From<String> for Predicate<M> {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

/// Named callbacks and predicates available for late binding.
///
/// A model's table is consulted before the machine's. Entries named
/// `on_enter_<state>` and `on_exit_<state>` in a model's table also run
/// whenever that model enters or exits the state.
pub struct CallbackTable<M> {
    callbacks: HashMap<String, Callback<M>>,
    predicates: HashMap<String, Predicate<M>>,
}

impl<M> Default for CallbackTable<M> {
    fn default() -> Self {
        Self {
            callbacks: HashMap::new(),
            predicates: HashMap::new(),
        }
    }
}

impl<M> Clone for CallbackTable<M> {
    fn clone(&self) -> Self {
        Self {
            callbacks: self.callbacks.clone(),
            predicates: self.predicates.clone(),
        }
    }
}

impl<M> CallbackTable<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(mut self, name: impl Into<String>, callback: Callback<M>) -> Self {
        self.insert_callback(name, callback);
        self
    }

    pub fn with_predicate(mut self, name: impl Into<String>, predicate: Predicate<M>) -> Self {
        self.insert_predicate(name, predicate);
        self
    }

    pub fn insert_callback(&mut self, name: impl Into<String>, callback: Callback<M>) {
        self.callbacks.insert(name.into(), callback);
    }

    pub fn insert_predicate(&mut self, name: impl Into<String>, predicate: Predicate<M>) {
        self.predicates.insert(name.into(), predicate);
    }

    pub fn callback(&self, name: &str) -> Option<&Callback<M>> {
        self.callbacks.get(name)
    }

    pub fn predicate(&self, name: &str) -> Option<&Predicate<M>> {
        self.predicates.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty() && self.predicates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Model;

    #[test]
    fn named_conversion_keeps_name() {
        let callback: Callback<Model> = Callback::from("on_ready");
        let predicate: Predicate<Model> = "is_ready".into();

        assert_eq!(callback.name(), Some("on_ready"));
        assert!(matches!(predicate, Predicate::Named(name) if name == "is_ready"));
    }

    #[test]
    fn table_stores_entries_by_name() {
        let table: CallbackTable<Model> = CallbackTable::new()
            .with_callback("log", Callback::new(|_| Ok(())))
            .with_predicate("always", Predicate::new(|_| true));

        assert!(table.callback("log").is_some());
        assert!(table.predicate("always").is_some());
        assert!(table.callback("missing").is_none());
        assert!(!table.is_empty());
    }

    #[test]
    fn lift_unwraps_engine_errors() {
        let inner: BoxError = Box::new(MachineError::Concurrency {
            trigger: "go".into(),
        });

        let lifted = lift(Phase::After, inner);

        assert!(matches!(lifted, MachineError::Concurrency { trigger } if trigger == "go"));
    }

    #[test]
    fn lift_wraps_user_errors_with_phase() {
        let lifted = lift(Phase::Before, "nope".into());

        assert!(matches!(lifted, MachineError::Callback { phase: Phase::Before, .. }));
    }
}
