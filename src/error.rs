//! Runtime errors raised while dispatching triggers.
//!
//! Configuration problems are reported as [`BuildError`] when a machine is
//! assembled; everything that can go wrong while a trigger is processed is a
//! [`MachineError`].

use crate::builder::BuildError;
use crate::engine::ModelId;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error type returned by user callbacks and predicates.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Return type of every user callback.
pub type CallbackResult = Result<(), BoxError>;

/// The pipeline phase a callback belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    PrepareEvent,
    Prepare,
    Condition,
    BeforeStateChange,
    Before,
    Exit,
    Enter,
    After,
    AfterStateChange,
    Final,
    Finalize,
    Exception,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PrepareEvent => "prepare_event",
            Self::Prepare => "prepare",
            Self::Condition => "condition",
            Self::BeforeStateChange => "before_state_change",
            Self::Before => "before",
            Self::Exit => "exit",
            Self::Enter => "enter",
            Self::After => "after",
            Self::AfterStateChange => "after_state_change",
            Self::Final => "on_final",
            Self::Finalize => "finalize_event",
            Self::Exception => "on_exception",
        };
        f.write_str(name)
    }
}

/// Why a unit of work was cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// A newer transition for the same model reached its commit point.
    Superseded,
    /// The host asked for the cancellation.
    External,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Superseded => f.write_str("superseded"),
            Self::External => f.write_str("external"),
        }
    }
}

/// Errors that can occur while processing a trigger.
#[derive(Debug, Clone, Error)]
pub enum MachineError {
    #[error(transparent)]
    Configuration(#[from] BuildError),

    #[error("{machine}Can't trigger event '{trigger}' from state(s) {states:?}")]
    InvalidTransition {
        machine: String,
        trigger: String,
        states: Vec<String>,
    },

    #[error("{machine}Do not know event named '{trigger}'")]
    UnknownTrigger { machine: String, trigger: String },

    #[error("State '{0}' is not a registered state")]
    InvalidDestination(String),

    #[error("Model {0} is not attached to this machine")]
    UnknownModel(ModelId),

    #[error("Trigger '{trigger}' was fired while a transition is already running for this model")]
    Concurrency { trigger: String },

    #[error("Callback '{0}' could not be resolved on the model or the machine")]
    CallbackNotFound(String),

    #[error("{phase} callback failed: {source}")]
    Callback {
        phase: Phase,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("{phase} callback is asynchronous and cannot run on a synchronous machine")]
    AsyncCallback { phase: Phase },

    #[error("Transition was cancelled ({0})")]
    Cancelled(CancelReason),
}

impl MachineError {
    pub(crate) fn callback(phase: Phase, error: BoxError) -> Self {
        MachineError::Callback {
            phase,
            source: Arc::from(error),
        }
    }

    /// Whether this error is a cancellation signal rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, MachineError::Cancelled(_))
    }
}
