//! Session coordination: the background state machine and its router.

pub mod controller;
pub mod messages;

pub use controller::{Coordinator, CoordinatorHandle, CoordinatorState, StopOutcome};
pub use messages::RouterMessage;
