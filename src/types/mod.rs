//! Shared data structures for the service monitor
//!
//! - EndpointConfig: immutable description of one monitored service
//! - EndpointState / EndpointStatus: per-endpoint runtime record
//! - StatusSummary, StatusChange, HealOutcome: what the supervisor reports

mod endpoint;
mod summary;

pub use endpoint::*;
pub use summary::*;
