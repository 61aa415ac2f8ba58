//! Background services: the polling supervisor and its heal tasks
//!
//! The supervisor runs one polling task and dispatches each heal onto its own
//! tokio task, tracked in a registry so shutdown can report what is still running.

mod healer;
mod slot;
mod supervisor;

pub use supervisor::{Supervisor, SupervisorBuilder, SupervisorError};
