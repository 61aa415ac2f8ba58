//! Config hot reload by polling.
//!
//! Every [`POLL_INTERVAL`] the file's modification time and size are compared
//! with the last seen pair. A change must hold still for [`SETTLE_DELAY`]
//! before the file is parsed, so a half-written file is not picked up. Parsed
//! results (or the parse error) go to the receiver, which decides whether to
//! apply them.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::MonitorConfig;

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// What the watcher observed after a change.
#[derive(Debug)]
pub enum ConfigEvent {
    Reloaded(MonitorConfig),
    /// The new contents could not be loaded; the previous config stays active
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: SystemTime,
    len: u64,
}

impl Fingerprint {
    fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self { modified: meta.modified().ok()?, len: meta.len() })
    }
}

/// Watch `path` until `cancel` fires or the receiver goes away.
pub async fn run_config_watcher(
    path: PathBuf,
    tx: mpsc::Sender<ConfigEvent>,
    cancel: CancellationToken,
) {
    info!(path = %path.display(), "Watching monitor config for changes");

    let mut seen = Fingerprint::of(&path);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let current = Fingerprint::of(&path);
        if current == seen {
            continue;
        }
        let Some(current) = current else {
            warn!(path = %path.display(), "Monitor config disappeared; keeping current config");
            seen = None;
            continue;
        };

        tokio::time::sleep(SETTLE_DELAY).await;
        if Fingerprint::of(&path) != Some(current) {
            // Still being written; pick it up next tick.
            continue;
        }
        seen = Some(current);

        let event = match MonitorConfig::load_from_file(&path) {
            Ok(config) => {
                info!(path = %path.display(), endpoints = config.endpoints.len(), "Monitor config changed");
                ConfigEvent::Reloaded(config)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Monitor config changed but failed to load");
                ConfigEvent::Error(e.to_string())
            }
        };
        if tx.send(event).await.is_err() {
            break;
        }
    }
    debug!("Config watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watcher_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_config_watcher(
            dir.path().join("monitor.json"),
            tx,
            cancel.clone(),
        ));
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watcher did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn watcher_reports_reload_and_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.json");
        let mut config = MonitorConfig::default();
        config.save_to_file(&path).unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_config_watcher(path.clone(), tx, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;

        config.check_interval_seconds = 7;
        config.save_to_file(&path).unwrap();
        match tokio::time::timeout(Duration::from_secs(6), rx.recv()).await.unwrap() {
            Some(ConfigEvent::Reloaded(reloaded)) => assert_eq!(reloaded.check_interval_seconds, 7),
            other => panic!("expected reload, got {other:?}"),
        }

        std::fs::write(&path, "{ not json").unwrap();
        match tokio::time::timeout(Duration::from_secs(6), rx.recv()).await.unwrap() {
            Some(ConfigEvent::Error(_)) => {}
            other => panic!("expected error, got {other:?}"),
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn fingerprint_tracks_existence_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.json");
        assert!(Fingerprint::of(&path).is_none());

        std::fs::write(&path, "{}").unwrap();
        let first = Fingerprint::of(&path).unwrap();
        std::fs::write(&path, "{ }").unwrap();
        assert_ne!(Fingerprint::of(&path), Some(first));
    }
}
