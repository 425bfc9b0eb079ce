//! Builder API for assembling machines.
//!
//! States are declared as nested [`StateBuilder`] trees, transitions with
//! [`TransitionBuilder`], and both are validated together when
//! [`MachineBuilder::build`] runs. Validation reports every problem found,
//! not just the first.

pub mod error;
pub mod machine;
pub mod state;
pub mod transition;
pub(crate) mod validation;

pub use error::{BuildError, ConfigIssue};
pub use machine::MachineBuilder;
pub use state::StateBuilder;
pub use transition::TransitionBuilder;
