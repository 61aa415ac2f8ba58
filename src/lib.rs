//! model-sentinel: self-healing monitor for locally hosted model services
//!
//! Watches a set of HTTP services (inference servers and similar), probes
//! their health on a fixed interval, and restarts the OS process behind any
//! service that stops answering, bounded by a per-endpoint restart budget and
//! confirmed by a post-restart verification loop.
//!
//! ## Architecture
//!
//! - **Probe**: one HTTP GET per check, classified into a failure taxonomy
//! - **Process**: discovery by substring match, graceful-then-forced termination, detached start
//! - **Recovery**: opt-in, platform-specific destructive cleanup between terminate and start
//! - **Background**: the supervisor loop, per-endpoint heal tasks and the control surface
//! - **Storage**: recovery audit log and single-instance lock
//! - **API**: axum control API over the supervisor

pub mod api;
pub mod background;
pub mod config;
pub mod probe;
pub mod process;
pub mod recovery;
pub mod storage;
pub mod types;

// Re-export the supervisor surface
pub use background::{Supervisor, SupervisorBuilder, SupervisorError};

// Re-export configuration
pub use config::{ConfigError, MonitorConfig};

// Re-export commonly used types
pub use types::{
    EndpointConfig, EndpointState, EndpointStatus, HealOutcome, OverallHealth, StatusChange,
    StatusSummary,
};

// Re-export capabilities
pub use probe::{HealthProbe, HttpProbe, ProbeError, ProbeOutcome};
pub use process::{ProcessController, ProcessError};
pub use recovery::{RecoveryProcedure, RepairReport};
pub use storage::RecoveryLog;
