//! Debug-mode recovery procedures
//!
//! Broad, destructive cleanup run between terminate and start when the
//! operator has enabled debug mode: killing whole interpreter families,
//! clearing scratch files named after the endpoint, and freeing its port.
//!
//! Each platform contributes a pure `plan` (unit-testable on any host);
//! `PlatformRecovery` executes a plan step by step. A failing step is
//! recorded and the next step still runs.

pub mod unix;
pub mod windows;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::config::defaults::{RECOVERY_STEP_PAUSE_SECS, RECOVERY_STEP_TIMEOUT_SECS};
use crate::storage::{RecoveryAction, RecoveryLog};
use crate::types::EndpointConfig;

// ============================================================================
// Error Types
// ============================================================================

/// Failure of one best-effort repair step. Logged, never escalated.
#[derive(Error, Debug)]
pub enum RecoveryStepError {
    #[error("{program}: {reason}")]
    Command { program: String, reason: String },

    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ============================================================================
// Plan
// ============================================================================

/// One isolated repair action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairStep {
    /// Run an external command
    Command { label: String, argv: Vec<String> },
    /// Delete entries in `dirs` whose lowercased name starts with `prefix`
    ClearScratch { dirs: Vec<PathBuf>, prefix: String },
}

impl RepairStep {
    pub fn label(&self) -> String {
        match self {
            RepairStep::Command { label, .. } => label.clone(),
            RepairStep::ClearScratch { prefix, .. } => format!("clear {prefix}* scratch files"),
        }
    }
}

/// Counts from one procedure run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub attempted: usize,
    pub failed: usize,
}

#[async_trait]
pub trait RecoveryProcedure: Send + Sync {
    async fn run(&self, endpoint: &EndpointConfig) -> RepairReport;
}

// ============================================================================
// Platform Executor
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }

    pub fn plan(self, endpoint: &EndpointConfig) -> Vec<RepairStep> {
        match self {
            Platform::Unix => unix::plan(endpoint),
            Platform::Windows => {
                windows::plan(endpoint, std::env::var_os("TEMP").map(PathBuf::from))
            }
        }
    }
}

/// Executes the plan for one platform.
pub struct PlatformRecovery {
    platform: Platform,
    log: Arc<RecoveryLog>,
    step_timeout: Duration,
    pause: Duration,
}

impl PlatformRecovery {
    /// Recovery for the platform this binary was built for.
    pub fn for_current_os(log: Arc<RecoveryLog>) -> Self {
        Self::new(Platform::current(), log)
    }

    pub fn new(platform: Platform, log: Arc<RecoveryLog>) -> Self {
        Self {
            platform,
            log,
            step_timeout: Duration::from_secs(RECOVERY_STEP_TIMEOUT_SECS),
            pause: Duration::from_secs(RECOVERY_STEP_PAUSE_SECS),
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    async fn execute(&self, step: &RepairStep) -> Result<String, RecoveryStepError> {
        match step {
            RepairStep::Command { argv, .. } => run_command(argv, self.step_timeout).await,
            RepairStep::ClearScratch { dirs, prefix } => {
                let dirs = dirs.clone();
                let prefix = prefix.clone();
                let removed = tokio::task::spawn_blocking(move || clear_scratch(&dirs, &prefix))
                    .await
                    .map_err(|e| RecoveryStepError::Command {
                        program: "clear_scratch".into(),
                        reason: e.to_string(),
                    })??;
                Ok(format!("removed {removed} entries"))
            }
        }
    }
}

#[async_trait]
impl RecoveryProcedure for PlatformRecovery {
    async fn run(&self, endpoint: &EndpointConfig) -> RepairReport {
        let name = endpoint.name.as_str();
        let steps = self.platform.plan(endpoint);
        let mut report = RepairReport::default();

        self.log.info(
            name,
            RecoveryAction::Repair,
            format!("Running debug repair for {name} ({} steps, {:?})", steps.len(), self.platform),
        );

        for (i, step) in steps.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.pause).await;
            }
            report.attempted += 1;
            match self.execute(step).await {
                Ok(detail) => {
                    self.log.info(name, RecoveryAction::Repair, format!("{}: {detail}", step.label()));
                }
                Err(e) => {
                    report.failed += 1;
                    self.log.warn(name, RecoveryAction::Repair, format!("Repair step failed ({}): {e}", step.label()));
                }
            }
        }

        report
    }
}

async fn run_command(argv: &[String], limit: Duration) -> Result<String, RecoveryStepError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(RecoveryStepError::Command { program: String::new(), reason: "empty command".into() });
    };

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(limit, output).await {
        Ok(Ok(output)) if output.status.success() => Ok(output.status.to_string()),
        Ok(Ok(output)) => Err(RecoveryStepError::Command {
            program: program.clone(),
            reason: format!("{} {}", output.status, String::from_utf8_lossy(&output.stderr).trim()),
        }),
        Ok(Err(e)) => Err(RecoveryStepError::Command { program: program.clone(), reason: e.to_string() }),
        Err(_) => Err(RecoveryStepError::Timeout { program: program.clone(), secs: limit.as_secs() }),
    }
}

/// Remove every entry directly inside `dirs` whose lowercased file name
/// starts with `prefix`. Missing directories are skipped; removal continues
/// past individual failures and the first one is returned.
pub fn clear_scratch(dirs: &[PathBuf], prefix: &str) -> Result<usize, RecoveryStepError> {
    if prefix.is_empty() {
        return Ok(0);
    }

    let mut removed = 0;
    let mut first_error = None;

    for dir in dirs {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                first_error.get_or_insert(io_error(dir, e));
                continue;
            }
        };

        for entry in entries.flatten() {
            if !entry.file_name().to_string_lossy().to_lowercase().starts_with(prefix) {
                continue;
            }
            let path = entry.path();
            // file_type does not follow symlinks, so links are unlinked, not traversed
            let result = match entry.file_type() {
                Ok(ft) if ft.is_dir() => std::fs::remove_dir_all(&path),
                Ok(_) => std::fs::remove_file(&path),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => {
                    first_error.get_or_insert(io_error(&path, e));
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(removed),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> RecoveryStepError {
    RecoveryStepError::Io { path: path.to_path_buf(), source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn clear_scratch_removes_only_prefixed_entries() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        std::fs::write(a.path().join("ollama-123.lock"), "x").unwrap();
        std::fs::write(a.path().join("keep-me.txt"), "x").unwrap();
        std::fs::create_dir_all(b.path().join("Ollama_cache/nested")).unwrap();
        std::fs::write(b.path().join("Ollama_cache/nested/blob"), "x").unwrap();

        let dirs = vec![
            a.path().to_path_buf(),
            b.path().to_path_buf(),
            a.path().join("does-not-exist"),
        ];
        let removed = clear_scratch(&dirs, "ollama").unwrap();

        assert_eq!(removed, 2);
        assert!(a.path().join("keep-me.txt").exists());
        assert!(!a.path().join("ollama-123.lock").exists());
        assert!(!b.path().join("Ollama_cache").exists());
    }

    #[test]
    fn clear_scratch_with_empty_prefix_is_noop() {
        let a = tempdir().unwrap();
        std::fs::write(a.path().join("anything"), "x").unwrap();
        assert_eq!(clear_scratch(&[a.path().to_path_buf()], "").unwrap(), 0);
        assert!(a.path().join("anything").exists());
    }

    #[tokio::test]
    async fn failing_steps_do_not_stop_the_rest() {
        let log = Arc::new(RecoveryLog::in_memory());
        let recovery = PlatformRecovery::new(Platform::current(), Arc::clone(&log))
            .with_pause(Duration::ZERO);

        let scratch = tempdir().unwrap();
        std::fs::write(scratch.path().join("svc.tmp"), "x").unwrap();

        let steps = vec![
            RepairStep::Command {
                label: "missing tool".into(),
                argv: vec!["no-such-repair-tool-91c2".into()],
            },
            RepairStep::ClearScratch {
                dirs: vec![scratch.path().to_path_buf()],
                prefix: "svc".into(),
            },
        ];

        let mut failed = 0;
        for step in &steps {
            if recovery.execute(step).await.is_err() {
                failed += 1;
            }
        }
        assert_eq!(failed, 1);
        assert!(!scratch.path().join("svc.tmp").exists());
    }

    #[tokio::test]
    async fn run_records_every_step_in_recovery_log() {
        let log = Arc::new(RecoveryLog::in_memory());
        let recovery = PlatformRecovery::new(Platform::current(), Arc::clone(&log))
            .with_pause(Duration::ZERO);

        // Name chosen so the scratch step cannot match real files.
        let cfg = EndpointConfig::new(
            "zz-sentinel-test-7d1e",
            "http://127.0.0.1:1",
            "/health",
            "zz-sentinel-test-7d1e",
            vec!["true".into()],
        );
        let report = recovery.run(&cfg).await;

        assert_eq!(report.attempted, Platform::current().plan(&cfg).len());
        let entries = log.entries_for("zz-sentinel-test-7d1e");
        assert_eq!(entries.len(), report.attempted + 1);
        assert!(entries.iter().all(|e| e.action == RecoveryAction::Repair));
    }
}
