//! On-disk state owned by the monitor process
//!
//! - `recovery_log`: append-only audit trail of healing actions
//! - `lockfile`: single-instance guard for the data directory

pub mod lockfile;
pub mod recovery_log;

pub use lockfile::{LockHolder, ProcessLock};
pub use recovery_log::{RecoveryAction, RecoveryEntry, RecoveryLog, Severity};
