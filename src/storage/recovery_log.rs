//! Recovery audit log: append-only JSON Lines record of every healing action.
//!
//! Kept apart from the operational `tracing` output so automated terminate /
//! start / verify steps can be reviewed after an incident without wading
//! through routine health-check noise. Each line is assembled in memory and
//! written with a single `write_all`, so concurrent heals never interleave
//! partial lines. A bounded in-memory ring serves the control API.
//!
//! Write failures are reported through `tracing` and otherwise ignored: a
//! heal must never fail because the audit file is unwritable.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::defaults::RECOVERY_LOG_CAPACITY;

/// Step of the heal cycle an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    HealStarted,
    StopCommand,
    Terminate,
    ForceKill,
    Repair,
    Start,
    ProcessExited,
    Verify,
    HealSucceeded,
    HealFailed,
}

/// Severity level for recovery entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A single recovery log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryEntry {
    pub ts: DateTime<Utc>,
    pub endpoint: String,
    pub action: RecoveryAction,
    pub severity: Severity,
    pub message: String,
}

/// Append-only recovery audit sink.
#[derive(Debug)]
pub struct RecoveryLog {
    path: Option<PathBuf>,
    file: Option<Mutex<File>>,
    recent: Mutex<VecDeque<RecoveryEntry>>,
    capacity: usize,
}

impl RecoveryLog {
    /// Open (or create) the log file in append mode.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        tracing::debug!(path = %path.display(), "Recovery log opened");

        Ok(Self {
            path: Some(path.to_path_buf()),
            file: Some(Mutex::new(file)),
            recent: Mutex::new(VecDeque::with_capacity(RECOVERY_LOG_CAPACITY)),
            capacity: RECOVERY_LOG_CAPACITY,
        })
    }

    /// Log that only keeps the in-memory ring (tests, `--status` runs).
    pub fn in_memory() -> Self {
        Self {
            path: None,
            file: None,
            recent: Mutex::new(VecDeque::with_capacity(RECOVERY_LOG_CAPACITY)),
            capacity: RECOVERY_LOG_CAPACITY,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one entry.
    pub fn record(
        &self,
        endpoint: &str,
        action: RecoveryAction,
        severity: Severity,
        message: impl Into<String>,
    ) {
        let entry = RecoveryEntry {
            ts: Utc::now(),
            endpoint: endpoint.to_string(),
            action,
            severity,
            message: message.into(),
        };

        tracing::debug!(
            target: "recovery",
            endpoint = %entry.endpoint,
            action = ?entry.action,
            severity = ?entry.severity,
            "{}",
            entry.message
        );

        if let Some(file) = &self.file {
            match serde_json::to_string(&entry) {
                Ok(mut line) => {
                    line.push('\n');
                    let mut guard = file.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Err(e) = guard.write_all(line.as_bytes()) {
                        tracing::warn!(error = %e, "Failed to write recovery log entry");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Failed to serialize recovery log entry"),
            }
        }

        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(entry);
    }

    pub fn info(&self, endpoint: &str, action: RecoveryAction, message: impl Into<String>) {
        self.record(endpoint, action, Severity::Info, message);
    }

    pub fn warn(&self, endpoint: &str, action: RecoveryAction, message: impl Into<String>) {
        self.record(endpoint, action, Severity::Warning, message);
    }

    pub fn error(&self, endpoint: &str, action: RecoveryAction, message: impl Into<String>) {
        self.record(endpoint, action, Severity::Error, message);
    }

    /// Most recent entries, oldest first. `None` returns the whole ring.
    pub fn recent(&self, limit: Option<usize>) -> Vec<RecoveryEntry> {
        let recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = limit.map_or(0, |n| recent.len().saturating_sub(n));
        recent.iter().skip(skip).cloned().collect()
    }

    /// Buffered entries for one endpoint, oldest first.
    pub fn entries_for(&self, endpoint: &str) -> Vec<RecoveryEntry> {
        let recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        recent.iter().filter(|e| e.endpoint == endpoint).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn entries_are_appended_as_json_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs/recovery.jsonl");

        let log = RecoveryLog::open(&path).unwrap();
        log.info("Ollama", RecoveryAction::HealStarted, "starting heal");
        log.error("Ollama", RecoveryAction::HealFailed, "gave up");
        drop(log);

        // Re-opening appends rather than truncating.
        let log = RecoveryLog::open(&path).unwrap();
        log.warn("LocalAI", RecoveryAction::ForceKill, "force killing 42");

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<RecoveryEntry> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].action, RecoveryAction::HealStarted);
        assert_eq!(lines[1].severity, Severity::Error);
        assert_eq!(lines[2].endpoint, "LocalAI");
    }

    #[test]
    fn ring_is_bounded_and_keeps_newest() {
        let log = RecoveryLog::in_memory();
        for i in 0..(RECOVERY_LOG_CAPACITY + 10) {
            log.info("svc", RecoveryAction::Verify, format!("attempt {i}"));
        }
        let all = log.recent(None);
        assert_eq!(all.len(), RECOVERY_LOG_CAPACITY);
        assert_eq!(all[0].message, "attempt 10");

        let last_two = log.recent(Some(2));
        assert_eq!(last_two.len(), 2);
        assert_eq!(
            last_two[1].message,
            format!("attempt {}", RECOVERY_LOG_CAPACITY + 9)
        );
    }

    #[test]
    fn entries_for_filters_by_endpoint() {
        let log = RecoveryLog::in_memory();
        log.info("a", RecoveryAction::Start, "x");
        log.info("b", RecoveryAction::Start, "y");
        log.info("a", RecoveryAction::Verify, "z");

        let a = log.entries_for("a");
        assert_eq!(a.len(), 2);
        assert!(a.iter().all(|e| e.endpoint == "a"));
        assert!(log.path().is_none());
    }
}
