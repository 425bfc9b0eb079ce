//! Per-trigger context handed to every callback.

use super::core::Definitions;
use super::model::{ModelId, ModelSlot};
use super::scheduler::{AdmissionMode, PendingTrigger, UnitId};
use crate::core::{Callback, Pocket, Predicate, State, Transition};
use crate::error::MachineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Positional and keyword arguments passed along with a trigger.
///
/// # Example
///
/// ```rust
/// use canopy::Arguments;
///
/// let args = Arguments::new().arg(3).kwarg("reason", "manual");
/// assert_eq!(args.get(0).and_then(|v| v.as_i64()), Some(3));
/// assert_eq!(args.kw("reason").and_then(|v| v.as_str()), Some("manual"));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Arguments {
    pub positional: Vec<Value>,
    pub keyword: Map<String, Value>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn kw(&self, key: &str) -> Option<&Value> {
        self.keyword.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}

/// How a trigger call ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// A transition ran to completion.
    Executed,
    /// No transition ran: every candidate was rejected, or the trigger was
    /// ignored, or an error was handed to `on_exception`.
    NotExecuted,
    /// The trigger was queued behind a running transition.
    Scheduled,
    /// A newer transition for the same model cancelled this one.
    Superseded,
}

impl Outcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, Outcome::Executed)
    }
}

/// Context for one trigger invocation.
///
/// Created when a trigger starts and dropped when it returns. Every phase
/// sees the same instance, so finalize callbacks can inspect the result and
/// the error recorded by earlier phases.
pub struct EventData<M> {
    pub(crate) machine: Arc<str>,
    pub(crate) slot: Arc<ModelSlot<M>>,
    pub(crate) definitions: Arc<Definitions<M>>,
    pub(crate) mode: AdmissionMode,
    pub(crate) trigger: String,
    pub(crate) args: Arguments,
    pub(crate) source: Option<String>,
    pub(crate) state: Option<Arc<State<M>>>,
    pub(crate) scope: Option<Arc<State<M>>>,
    pub(crate) transition: Option<Arc<Transition<M>>>,
    pub(crate) result: bool,
    pub(crate) error: Option<MachineError>,
    pub(crate) unit: Option<UnitId>,
    pub(crate) started_at: DateTime<Utc>,
}

impl<M> EventData<M> {
    pub(crate) fn new(
        slot: Arc<ModelSlot<M>>,
        definitions: Arc<Definitions<M>>,
        trigger: &str,
        args: Arguments,
        unit: Option<UnitId>,
    ) -> Self {
        Self {
            machine: Arc::from(definitions.options.label()),
            mode: definitions.options.mode,
            slot,
            definitions,
            trigger: trigger.to_string(),
            args,
            source: None,
            state: None,
            scope: None,
            transition: None,
            result: false,
            error: None,
            unit,
            started_at: Utc::now(),
        }
    }

    /// Machine name as used in log and error messages.
    pub fn machine_name(&self) -> &str {
        self.machine.trim_end_matches(": ")
    }

    pub fn model(&self) -> &M {
        &self.slot.model
    }

    /// Shared handle to the model, for moving into spawned work.
    pub fn model_handle(&self) -> &Arc<M> {
        &self.slot.model
    }

    pub fn model_id(&self) -> ModelId {
        self.slot.id
    }

    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    pub fn args(&self) -> &Arguments {
        &self.args
    }

    /// Qualified name of the active path the transition is matched from.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// State the transition is matched from.
    pub fn state(&self) -> Option<&Arc<State<M>>> {
        self.state.as_ref()
    }

    /// State whose enter or exit callbacks are running.
    pub fn scope(&self) -> Option<&Arc<State<M>>> {
        self.scope.as_ref()
    }

    /// Pocket of the state being entered or exited.
    pub fn pocket(&self) -> Option<&Pocket> {
        self.scope.as_deref().map(State::pocket)
    }

    pub fn transition(&self) -> Option<&Arc<Transition<M>>> {
        self.transition.as_ref()
    }

    /// Whether a transition has been executed so far.
    pub fn result(&self) -> bool {
        self.result
    }

    /// Error recorded by an earlier phase.
    pub fn error(&self) -> Option<&MachineError> {
        self.error.as_ref()
    }

    /// Unit of work running this trigger. Only set by [`AsyncMachine`](crate::AsyncMachine).
    pub fn unit(&self) -> Option<UnitId> {
        self.unit
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Look up any registered state, for example to read its pocket.
    pub fn get_state(&self, name: &str) -> Option<Arc<State<M>>> {
        self.definitions.states.get(name).cloned()
    }

    /// Qualified names of the model's active leaves.
    pub fn active_states(&self) -> Vec<String> {
        self.slot
            .tree()
            .leaves(self.definitions.states.separator())
    }

    /// Fire another trigger on the same model from inside a callback.
    ///
    /// Queued machines append it to the model's queue and return
    /// [`Outcome::Scheduled`]; it runs once the current trigger has fully
    /// returned. Immediate machines reject it with
    /// [`MachineError::Concurrency`].
    pub fn fire(&self, trigger: &str) -> Result<Outcome, MachineError> {
        self.fire_with(trigger, Arguments::new())
    }

    pub fn fire_with(&self, trigger: &str, args: Arguments) -> Result<Outcome, MachineError> {
        match self.mode {
            AdmissionMode::Queued => {
                self.slot.admission.enqueue(PendingTrigger {
                    trigger: trigger.to_string(),
                    args,
                });
                tracing::debug!(
                    machine = %self.machine_name(),
                    trigger,
                    "queued trigger from running transition"
                );
                Ok(Outcome::Scheduled)
            }
            AdmissionMode::Immediate => Err(MachineError::Concurrency {
                trigger: trigger.to_string(),
            }),
        }
    }

    pub(crate) fn lookup_callback(&self, name: &str) -> Result<Callback<M>, MachineError> {
        self.slot
            .callbacks
            .callback(name)
            .or_else(|| self.definitions.callbacks.callback(name))
            .filter(|callback| callback.name().is_none())
            .cloned()
            .ok_or_else(|| MachineError::CallbackNotFound(name.to_string()))
    }

    pub(crate) fn lookup_predicate(&self, name: &str) -> Result<Predicate<M>, MachineError> {
        self.slot
            .callbacks
            .predicate(name)
            .or_else(|| self.definitions.callbacks.predicate(name))
            .filter(|predicate| !matches!(predicate, Predicate::Named(_)))
            .cloned()
            .ok_or_else(|| MachineError::CallbackNotFound(name.to_string()))
    }

    /// Callback the model registered for a state notification, if any.
    pub(crate) fn model_hook(&self, name: &str) -> Option<Callback<M>> {
        self.slot.callbacks.callback(name).cloned()
    }

    pub(crate) fn set_source(&mut self, source: &str) {
        self.source = Some(source.to_string());
        self.state = self.definitions.states.get(source).cloned();
    }
}
