//! OS-backed process controller
//!
//! Termination prefers the endpoint's own stop command. When there is none,
//! or it fails, every matching process gets a graceful signal, a grace
//! period, and then a forced kill if it is still around.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{find_processes, ProcessController, ProcessError, ProcessTable, StopSignal};
use crate::config::defaults::{
    FORCE_KILL_WAIT_SECS, STOP_COMMAND_TIMEOUT_SECS, TERMINATE_GRACE_SECS,
};
use crate::storage::{RecoveryAction, RecoveryLog};
use crate::types::EndpointConfig;

/// Waits used during termination.
#[derive(Debug, Clone, Copy)]
pub struct ProcessTimings {
    /// Upper bound on a custom stop command
    pub stop_command_timeout: Duration,
    /// Wait after a stop command or graceful signal before rescanning
    pub grace_period: Duration,
    /// Wait after force-killing survivors before the final rescan
    pub force_kill_wait: Duration,
}

impl Default for ProcessTimings {
    fn default() -> Self {
        Self {
            stop_command_timeout: Duration::from_secs(STOP_COMMAND_TIMEOUT_SECS),
            grace_period: Duration::from_secs(TERMINATE_GRACE_SECS),
            force_kill_wait: Duration::from_secs(FORCE_KILL_WAIT_SECS),
        }
    }
}

/// `ProcessController` that drives real OS processes.
pub struct OsProcessController {
    table: Arc<dyn ProcessTable>,
    log: Arc<RecoveryLog>,
    timings: ProcessTimings,
}

impl OsProcessController {
    pub fn new(table: Arc<dyn ProcessTable>, log: Arc<RecoveryLog>) -> Self {
        Self { table, log, timings: ProcessTimings::default() }
    }

    pub fn with_timings(mut self, timings: ProcessTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Scan off the async runtime; a full process listing can take a while.
    async fn scan(&self, pattern: &str) -> Result<Vec<u32>, ProcessError> {
        let table = Arc::clone(&self.table);
        let pattern = pattern.to_string();
        tokio::task::spawn_blocking(move || find_processes(table.as_ref(), &pattern))
            .await
            .map_err(|e| ProcessError::Scan(e.to_string()))
    }

    fn send(&self, endpoint: &str, pid: u32, signal: StopSignal) {
        match self.table.signal(pid, signal) {
            Ok(()) | Err(ProcessError::NoSuchProcess(_)) => {}
            Err(e) => {
                let action = match signal {
                    StopSignal::Graceful => RecoveryAction::Terminate,
                    StopSignal::Force => RecoveryAction::ForceKill,
                };
                self.log.error(endpoint, action, e.to_string());
            }
        }
    }

    async fn run_stop_command(&self, argv: &[String]) -> Result<(), ProcessError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ProcessError::StopCommand("empty stop command".into()))?;

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timings.stop_command_timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(spawn_error(program, e)),
            Err(_) => {
                return Err(ProcessError::StopCommand(format!(
                    "timed out after {}s",
                    self.timings.stop_command_timeout.as_secs()
                )))
            }
        };

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ProcessError::StopCommand(format!(
                "{} {}",
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl ProcessController for OsProcessController {
    async fn terminate(&self, endpoint: &EndpointConfig) -> Result<(), ProcessError> {
        let name = endpoint.name.as_str();
        self.log.info(name, RecoveryAction::Terminate, format!("Attempting to terminate {name} processes"));

        if let Some(stop_command) = &endpoint.stop_command {
            self.log.info(
                name,
                RecoveryAction::StopCommand,
                format!("Using custom stop command: {}", stop_command.join(" ")),
            );
            match self.run_stop_command(stop_command).await {
                Ok(()) => {
                    self.log.info(name, RecoveryAction::StopCommand, "Custom stop command succeeded");
                    tokio::time::sleep(self.timings.grace_period).await;
                    return Ok(());
                }
                Err(e) => {
                    self.log.warn(name, RecoveryAction::StopCommand, e.to_string());
                }
            }
        }

        let pids = self.scan(&endpoint.process_match).await?;
        if pids.is_empty() {
            self.log.info(name, RecoveryAction::Terminate, format!("No {name} processes found to terminate"));
            return Ok(());
        }

        for &pid in &pids {
            self.log.info(name, RecoveryAction::Terminate, format!("Gracefully terminating PID {pid}"));
            self.send(name, pid, StopSignal::Graceful);
        }
        tokio::time::sleep(self.timings.grace_period).await;

        let survivors = self.scan(&endpoint.process_match).await?;
        if survivors.is_empty() {
            return Ok(());
        }

        for &pid in &survivors {
            self.log.warn(name, RecoveryAction::ForceKill, format!("Force killing PID {pid}"));
            self.send(name, pid, StopSignal::Force);
        }
        tokio::time::sleep(self.timings.force_kill_wait).await;

        let remaining = self.scan(&endpoint.process_match).await?;
        if remaining.is_empty() {
            Ok(())
        } else {
            let error = ProcessError::TerminationFailed { pids: remaining };
            self.log.error(name, RecoveryAction::ForceKill, error.to_string());
            Err(error)
        }
    }

    async fn start(&self, endpoint: &EndpointConfig) -> Result<Option<u32>, ProcessError> {
        let name = endpoint.name.clone();
        let (program, args) = endpoint
            .start_command
            .split_first()
            .filter(|(program, _)| !program.is_empty())
            .ok_or_else(|| ProcessError::NoStartCommand(name.clone()))?;

        self.log.info(
            &name,
            RecoveryAction::Start,
            format!("Starting {name} with command: {}", endpoint.start_command.join(" ")),
        );

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Own process group so a Ctrl+C aimed at the monitor leaves services running.
        #[cfg(unix)]
        command.process_group(0);
        #[cfg(windows)]
        command.creation_flags(0x0000_0200); // CREATE_NEW_PROCESS_GROUP

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let error = spawn_error(program, e);
                self.log.error(&name, RecoveryAction::Start, format!("Error starting {name}: {error}"));
                return Err(error);
            }
        };

        let pid = child.id();
        self.log.info(
            &name,
            RecoveryAction::Start,
            format!("Started {name} with PID {}", pid.map_or_else(|| "?".to_string(), |p| p.to_string())),
        );

        // Reap the child so it never lingers as a zombie.
        let log = Arc::clone(&self.log);
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    log.info(&name, RecoveryAction::ProcessExited, format!("Process exited ({status})"));
                }
                Ok(status) => {
                    log.warn(&name, RecoveryAction::ProcessExited, format!("Process exited ({status})"));
                }
                Err(e) => {
                    log.warn(&name, RecoveryAction::ProcessExited, format!("Failed to wait on process: {e}"));
                }
            }
        });

        Ok(pid)
    }
}

fn spawn_error(program: &str, error: std::io::Error) -> ProcessError {
    match error.kind() {
        std::io::ErrorKind::NotFound => ProcessError::ExecutableNotFound(program.to_string()),
        std::io::ErrorKind::PermissionDenied => ProcessError::PermissionDenied(program.to_string()),
        _ => ProcessError::Spawn { program: program.to_string(), source: error },
    }
}
