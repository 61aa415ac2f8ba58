//! Process table: OS process discovery and signalling behind a trait
//!
//! `ProcessTable` is the injectable capability; `SystemProcessTable` reads the
//! real OS table through `sysinfo`, tests provide their own fake tables.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, Signal, System, UpdateKind};

use super::ProcessError;

/// One row of a process table snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    /// Arguments joined with single spaces; empty when not introspectable
    pub cmdline: String,
}

/// How hard to ask a process to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGTERM (or the platform's polite equivalent)
    Graceful,
    /// SIGKILL / TerminateProcess
    Force,
}

/// Source of process information and the ability to signal processes.
pub trait ProcessTable: Send + Sync {
    /// Every process visible to the monitor. Entries that cannot be
    /// introspected are returned with whatever fields are readable.
    fn snapshot(&self) -> Vec<ProcessEntry>;

    /// Deliver `signal` to `pid`. A process that no longer exists yields
    /// `ProcessError::NoSuchProcess`.
    fn signal(&self, pid: u32, signal: StopSignal) -> Result<(), ProcessError>;
}

/// PIDs whose name, or failing that whose command line, contains `pattern`
/// (case-insensitive). The monitor's own PID is never returned.
pub fn find_processes(table: &dyn ProcessTable, pattern: &str) -> Vec<u32> {
    let pattern = pattern.to_lowercase();
    if pattern.is_empty() {
        return Vec::new();
    }
    let own_pid = std::process::id();

    table
        .snapshot()
        .into_iter()
        .filter(|entry| entry.pid != own_pid)
        .filter(|entry| {
            entry.name.to_lowercase().contains(&pattern)
                || entry.cmdline.to_lowercase().contains(&pattern)
        })
        .map(|entry| entry.pid)
        .collect()
}

// ============================================================================
// OS-backed table
// ============================================================================

/// Names are always loaded; command lines must be requested.
pub(crate) fn with_cmdline() -> ProcessRefreshKind {
    ProcessRefreshKind::nothing().with_cmd(UpdateKind::OnlyIfNotSet)
}

/// `ProcessTable` over the live OS process list.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn snapshot(&self) -> Vec<ProcessEntry> {
        let mut system = System::new();
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, with_cmdline());

        system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessEntry {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
                cmdline: process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" "),
            })
            .collect()
    }

    fn signal(&self, pid: u32, signal: StopSignal) -> Result<(), ProcessError> {
        let sys_pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);

        let process = system
            .process(sys_pid)
            .ok_or(ProcessError::NoSuchProcess(pid))?;

        let delivered = match signal {
            // Platforms without SIGTERM (Windows) fall back to a hard kill.
            StopSignal::Graceful => process
                .kill_with(Signal::Term)
                .unwrap_or_else(|| process.kill()),
            StopSignal::Force => process.kill(),
        };

        if delivered {
            Ok(())
        } else {
            Err(ProcessError::Signal {
                pid,
                reason: format!("{signal:?} signal was not delivered"),
            })
        }
    }
}
