//! Canopy: an embeddable hierarchical state machine runtime
//!
//! Canopy drives host-owned models through nested and parallel states. A
//! trigger fired for a model runs a fixed pipeline of user callbacks:
//! preparation, conditions, the state change itself and finalization. Errors
//! raised anywhere in the pipeline can be routed to a single handler.
//!
//! # Core Concepts
//!
//! - **States**: Declared as trees; a composite state enters its initial
//!   child, a parallel state enters all of its children
//! - **Triggers**: Named events matched against the model's active states,
//!   innermost first
//! - **Pockets**: Per-state scratch storage that is cleared when the state
//!   is exited
//! - **Admission**: Immediate or queued handling of triggers fired while
//!   another transition is running
//! - **Units of work**: On [`AsyncMachine`], a transition that passes its
//!   conditions cancels the stale transitions of the same model
//!
//! # Example
//!
//! ```rust
//! use canopy::{MachineBuilder, StateBuilder, TransitionBuilder};
//!
//! struct Workflow;
//!
//! let machine = MachineBuilder::<Workflow>::new()
//!     .state(StateBuilder::new("draft"))
//!     .state(
//!         StateBuilder::new("review")
//!             .children(["pending", "approved"])
//!             .initial("pending"),
//!     )
//!     .state(StateBuilder::new("published").final_state())
//!     .initial("draft")
//!     .transition(TransitionBuilder::new("submit").from("draft").to("review"))
//!     .transition(TransitionBuilder::new("approve").from("review_pending").to("review_approved"))
//!     .transition(TransitionBuilder::new("publish").from("review_approved").to("published"))
//!     .build()
//!     .unwrap();
//!
//! let doc = machine.add_model(Workflow).unwrap();
//! machine.trigger(doc, "submit").unwrap();
//! assert!(machine.is_state(doc, "review", true).unwrap());
//!
//! machine.trigger(doc, "approve").unwrap();
//! machine.trigger(doc, "publish").unwrap();
//! assert_eq!(machine.state(doc).unwrap(), vec!["published"]);
//! ```

pub mod builder;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;

// Re-export commonly used types
pub use builder::{BuildError, ConfigIssue, MachineBuilder, StateBuilder, TransitionBuilder};
pub use config::MachineConfig;
pub use core::{Callback, CallbackTable, Condition, Pocket, Predicate, StateAspect};
pub use engine::{
    AdmissionMode, Arguments, AsyncMachine, Attach, EventData, Machine, MachineOptions, ModelId,
    Outcome, UnitId,
};
pub use error::{BoxError, CallbackResult, CancelReason, MachineError, Phase};
