//! Process lifecycle: discovery, termination and start of service processes
//!
//! - `table`: the injectable process table and substring matching
//! - `controller`: graceful-then-forced termination and detached start

mod controller;
mod table;

pub use controller::{OsProcessController, ProcessTimings};
pub use table::{find_processes, ProcessEntry, ProcessTable, StopSignal, SystemProcessTable};
pub(crate) use table::with_cmdline;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::EndpointConfig;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("No start command configured for {0}")]
    NoStartCommand(String),

    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("Permission denied executing {0}")]
    PermissionDenied(String),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stop command failed: {0}")]
    StopCommand(String),

    #[error("No such process: {0}")]
    NoSuchProcess(u32),

    #[error("Failed to signal PID {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    #[error("{} matching process(es) survived forced termination: {pids:?}", pids.len())]
    TerminationFailed { pids: Vec<u32> },

    #[error("Process scan failed: {0}")]
    Scan(String),
}

// ============================================================================
// Controller Trait
// ============================================================================

/// Terminates and starts the OS process behind an endpoint.
#[async_trait]
pub trait ProcessController: Send + Sync {
    /// Stop every process belonging to the endpoint. No matching process
    /// is success.
    async fn terminate(&self, endpoint: &EndpointConfig) -> Result<(), ProcessError>;

    /// Spawn `startCommand` detached from the monitor and return its PID.
    /// The caller waits `restartDelay` before assuming readiness.
    async fn start(&self, endpoint: &EndpointConfig) -> Result<Option<u32>, ProcessError>;
}
