//! Trigger execution.
//!
//! [`Machine`] and [`AsyncMachine`] share the same definitions and model
//! bookkeeping and differ only in how they run the pipeline: on the calling
//! thread, or as cancellable units of work on the caller's runtime.

mod async_machine;
mod core;
mod event;
mod machine;
mod model;
mod scheduler;

pub use async_machine::AsyncMachine;
pub use self::core::MachineOptions;
pub use event::{Arguments, EventData, Outcome};
pub use machine::Machine;
pub use model::{Attach, ModelId};
pub use scheduler::{AdmissionMode, UnitId};

pub(crate) use self::core::Definitions;
