//! Single-instance lock for the data directory
//!
//! Two monitors pointed at the same services would both kill and restart
//! them. `--start` therefore takes `.model-sentinel.lock` in the data
//! directory, created atomically and holding the owner's PID as JSON.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::process::with_cmdline;

const LOCK_FILE_NAME: &str = ".model-sentinel.lock";

/// Contents of the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockHolder {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// Held for the lifetime of a `--start` run; the file is removed on drop.
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    held: bool,
}

impl ProcessLock {
    /// Take the lock in `data_dir`, clearing it first if its holder is gone.
    pub fn acquire<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        let path = data_dir.join(LOCK_FILE_NAME);

        // Second pass only happens after a stale lock was removed.
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let holder = LockHolder { pid: std::process::id(), started_at: Utc::now() };
                    serde_json::to_writer(&mut file, &holder)
                        .context("Failed to write lock holder")?;
                    file.flush().context("Failed to write lock holder")?;
                    tracing::debug!(path = %path.display(), pid = holder.pid, "Process lock acquired");
                    return Ok(Self { path, held: true });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    match read_holder(&path) {
                        Some(holder) if holder_is_live(holder.pid) => bail!(
                            "model-sentinel is already running (PID {}, since {}). \
                             Stop it, or delete {} if that process is not a monitor.",
                            holder.pid,
                            holder.started_at.to_rfc3339(),
                            path.display()
                        ),
                        stale => {
                            tracing::info!(
                                path = %path.display(),
                                previous_pid = ?stale.map(|h| h.pid),
                                "Removing stale process lock"
                            );
                            match fs::remove_file(&path) {
                                Ok(()) => {}
                                Err(e) if e.kind() == ErrorKind::NotFound => {}
                                Err(e) => {
                                    return Err(e).context("Failed to remove stale process lock")
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to create lock file {}", path.display()))
                }
            }
        }

        bail!("Another monitor took {} while a stale lock was being cleared", path.display())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file. Idempotent.
    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Process lock released"),
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove process lock"),
        }
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// `None` for unreadable or malformed lock files.
fn read_holder(path: &Path) -> Option<LockHolder> {
    let raw = fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

/// A PID only counts if it still looks like a monitor; recycled PIDs do not.
fn holder_is_live(pid: u32) -> bool {
    if pid == std::process::id() {
        return false;
    }
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, with_cmdline());

    system.process(pid).is_some_and(|process| {
        let name = process.name().to_string_lossy().to_lowercase();
        name.contains("model-sentinel")
            || process
                .cmd()
                .iter()
                .any(|arg| arg.to_string_lossy().to_lowercase().contains("model-sentinel"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lock_file_records_current_pid() {
        let dir = tempdir().unwrap();
        let lock = ProcessLock::acquire(dir.path()).unwrap();

        let holder = read_holder(lock.path()).unwrap();
        assert_eq!(holder.pid, std::process::id());
    }

    #[test]
    fn dropping_the_lock_removes_the_file() {
        let dir = tempdir().unwrap();
        let path = {
            let lock = ProcessLock::acquire(dir.path()).unwrap();
            lock.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn dead_holder_is_replaced() {
        let dir = tempdir().unwrap();
        let stale = LockHolder { pid: 999_999_999, started_at: Utc::now() };
        fs::write(dir.path().join(LOCK_FILE_NAME), serde_json::to_string(&stale).unwrap()).unwrap();

        let lock = ProcessLock::acquire(dir.path()).unwrap();
        assert_eq!(read_holder(lock.path()).unwrap().pid, std::process::id());
    }

    #[test]
    fn malformed_lock_is_replaced() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(LOCK_FILE_NAME), "12345\n").unwrap();

        let lock = ProcessLock::acquire(dir.path()).unwrap();
        assert!(read_holder(lock.path()).is_some());
    }

    #[test]
    fn release_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut lock = ProcessLock::acquire(dir.path()).unwrap();
        lock.release();
        lock.release();
        assert!(!dir.path().join(LOCK_FILE_NAME).exists());
    }
}
