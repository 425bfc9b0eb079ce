//! Core state machine types.
//!
//! This module contains the data model of the runtime:
//! - State definitions, aspects and pockets
//! - Transitions, conditions and callbacks
//! - Active-state trees and transition resolution
//! - Registries and per-model history
//!
//! Nothing in here runs user code; execution lives in [`crate::engine`].

mod callback;
mod guard;
mod history;
mod registry;
mod state;
mod transition;
mod tree;

pub use callback::{Callback, CallbackTable, Predicate};
pub use guard::Condition;
pub use history::{History, TransitionRecord};
pub use registry::{Event, EventRegistry, Hooks, StateRegistry};
pub use state::{Pocket, State, StateAspect};
pub use transition::{Source, Target, Transition};
pub use tree::{initial_tree, resolve, Resolution, StateTree, Topology};

pub(crate) use callback::{lift, run_async, run_sync};
