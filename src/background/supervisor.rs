//! Supervisor: polling loop, heal dispatch and the control surface
//!
//! One loop task probes every enabled endpoint sequentially each
//! `checkIntervalSeconds`. A failing endpoint under its restart budget gets a
//! heal on its own task, so a slow heal never stalls other probes. The
//! supervisor is a cheap `Clone` handle; the binary owns one and hands clones
//! to the API layer.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::healer::{HealPolicy, Healer};
use super::slot::{EndpointSlot, HealGuard};
use crate::config::defaults::{STATUS_EVENT_CAPACITY, STOP_JOIN_TIMEOUT_SECS};
use crate::config::{validate_endpoint, ConfigError, MonitorConfig};
use crate::probe::{HealthProbe, HttpProbe};
use crate::process::{OsProcessController, ProcessController, SystemProcessTable};
use crate::recovery::{PlatformRecovery, RecoveryProcedure};
use crate::storage::RecoveryLog;
use crate::types::{
    EndpointConfig, EndpointStatus, HealOutcome, OverallHealth, StatusChange, StatusSummary,
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("Endpoint already exists: {0}")]
    DuplicateEndpoint(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

// ============================================================================
// Internal State
// ============================================================================

/// Scalar settings; endpoint configs live in their slots.
#[derive(Debug, Clone, Copy)]
struct Settings {
    check_interval_seconds: u64,
    /// Saved with the config
    debug_mode: bool,
    /// Process-lifetime override (`--debug`); never saved
    session_debug: bool,
    verify_attempts: u32,
    verify_interval_seconds: u64,
}

impl Settings {
    fn from_config(config: &MonitorConfig, session_debug: bool) -> Self {
        Self {
            check_interval_seconds: config.check_interval_seconds,
            debug_mode: config.debug_mode,
            session_debug,
            verify_attempts: config.verify_attempts,
            verify_interval_seconds: config.verify_interval_seconds,
        }
    }
}

struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    /// Ordered as in the config file
    slots: RwLock<Vec<Arc<EndpointSlot>>>,
    settings: Mutex<Settings>,
    config_path: Option<PathBuf>,
    healer: Healer,
    events: broadcast::Sender<StatusChange>,
    heals: Mutex<HashMap<String, JoinHandle<()>>>,
    monitor: Mutex<Option<LoopHandle>>,
    last_check: Mutex<Option<DateTime<Utc>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Builder
// ============================================================================

/// Wires a `Supervisor`. Unset capabilities default to the OS-backed ones.
pub struct SupervisorBuilder {
    config: MonitorConfig,
    config_path: Option<PathBuf>,
    probe: Option<Arc<dyn HealthProbe>>,
    processes: Option<Arc<dyn ProcessController>>,
    recovery: Option<Arc<dyn RecoveryProcedure>>,
    log: Option<Arc<RecoveryLog>>,
    session_debug: bool,
}

impl SupervisorBuilder {
    /// File that endpoint and debug-mode changes are persisted to.
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Enable destructive repair for this process only. The override is not
    /// written to the config file and survives reloads.
    pub fn session_debug(mut self, enabled: bool) -> Self {
        self.session_debug = enabled;
        self
    }

    pub fn probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn process_controller(mut self, processes: Arc<dyn ProcessController>) -> Self {
        self.processes = Some(processes);
        self
    }

    pub fn recovery(mut self, recovery: Arc<dyn RecoveryProcedure>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    pub fn recovery_log(mut self, log: Arc<RecoveryLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn build(self) -> Result<Supervisor, SupervisorError> {
        self.config.validate()?;

        let log = self.log.unwrap_or_else(|| Arc::new(RecoveryLog::in_memory()));
        let probe: Arc<dyn HealthProbe> = match self.probe {
            Some(probe) => probe,
            None => Arc::new(HttpProbe::new()?),
        };
        let processes = self.processes.unwrap_or_else(|| {
            Arc::new(OsProcessController::new(Arc::new(SystemProcessTable), Arc::clone(&log)))
        });
        let recovery = self
            .recovery
            .unwrap_or_else(|| Arc::new(PlatformRecovery::for_current_os(Arc::clone(&log))));

        let (events, _) = broadcast::channel(STATUS_EVENT_CAPACITY);
        let slots = self
            .config
            .endpoints
            .iter()
            .map(|cfg| EndpointSlot::new(cfg.clone(), events.clone()))
            .collect();

        Ok(Supervisor {
            inner: Arc::new(Inner {
                slots: RwLock::new(slots),
                settings: Mutex::new(Settings::from_config(&self.config, self.session_debug)),
                config_path: self.config_path,
                healer: Healer { probe, processes, recovery, log },
                events,
                heals: Mutex::new(HashMap::new()),
                monitor: Mutex::new(None),
                last_check: Mutex::new(None),
            }),
        })
    }
}

// ============================================================================
// Supervisor
// ============================================================================

#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn builder(config: MonitorConfig) -> SupervisorBuilder {
        SupervisorBuilder {
            config,
            config_path: None,
            probe: None,
            processes: None,
            recovery: None,
            log: None,
            session_debug: false,
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Launch the polling loop. The first pass runs immediately. Returns
    /// `false` (and does nothing) if monitoring is already active.
    pub fn start(&self) -> bool {
        let mut monitor = lock(&self.inner.monitor);
        if monitor.is_some() {
            warn!("Monitoring already active");
            return false;
        }

        let cancel = CancellationToken::new();
        let this = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { this.run_loop(token).await });

        *monitor = Some(LoopHandle { cancel, task });
        info!(
            endpoints = self.slots().len(),
            interval_secs = self.settings().check_interval_seconds,
            "Monitoring started"
        );
        true
    }

    /// Stop the polling loop and wait (bounded) for the current pass to end.
    /// In-flight heals keep running. Returns `false` if it was not running.
    pub async fn stop(&self) -> bool {
        let handle = lock(&self.inner.monitor).take();
        let Some(handle) = handle else {
            warn!("Monitoring is not active");
            return false;
        };

        handle.cancel.cancel();
        match tokio::time::timeout(Duration::from_secs(STOP_JOIN_TIMEOUT_SECS), handle.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Monitoring loop ended abnormally"),
            Err(_) => warn!(
                timeout_secs = STOP_JOIN_TIMEOUT_SECS,
                "Monitoring loop did not finish in time; detaching"
            ),
        }

        let outstanding = self.active_heals();
        if outstanding.is_empty() {
            info!("Monitoring stopped");
        } else {
            info!(heals = ?outstanding, "Monitoring stopped; heals still running");
        }
        true
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.monitor).is_some()
    }

    async fn run_loop(&self, cancel: CancellationToken) {
        loop {
            self.poll_once().await;

            let interval = Duration::from_secs(self.settings().check_interval_seconds);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        debug!("Monitoring loop exited");
    }

    // ------------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------------

    /// One pass: probe every enabled endpoint in order and dispatch heals for
    /// failing ones that are under budget and not already healing.
    pub async fn poll_once(&self) {
        for slot in self.slots() {
            let config = slot.config();
            if !config.enabled || slot.heal_in_flight() {
                continue;
            }

            let outcome = self.inner.healer.probe.probe(&config).await;
            let was = slot.snapshot().status;
            if !slot.record_probe(&outcome) {
                continue;
            }

            if outcome.healthy {
                if was != EndpointStatus::Online {
                    info!(endpoint = %config.name, latency_ms = ?outcome.latency_ms, "Endpoint online");
                }
                continue;
            }

            if was != EndpointStatus::Offline {
                warn!(endpoint = %config.name, error = ?outcome.error, "Endpoint offline");
            }
            self.maybe_dispatch_heal(&slot, &config);
        }
        self.touch_last_check();
    }

    /// Probe every enabled endpoint and record results without healing.
    pub async fn check_all(&self) {
        for slot in self.slots() {
            let config = slot.config();
            if !config.enabled {
                continue;
            }
            let outcome = self.inner.healer.probe.probe(&config).await;
            slot.record_probe(&outcome);
        }
        self.touch_last_check();
    }

    fn maybe_dispatch_heal(&self, slot: &Arc<EndpointSlot>, config: &EndpointConfig) {
        let restart_count = slot.snapshot().restart_count;
        if restart_count >= config.max_restart_attempts {
            debug!(
                endpoint = %config.name,
                restart_count,
                max = config.max_restart_attempts,
                "Restart budget exhausted; not auto-healing"
            );
            return;
        }

        if let Some(guard) = slot.try_begin_heal() {
            info!(endpoint = %config.name, "Dispatching automatic heal");
            self.spawn_heal(guard);
        }
    }

    /// Run a heal on its own task and register it. The receiver yields the outcome.
    fn spawn_heal(&self, guard: HealGuard) -> oneshot::Receiver<HealOutcome> {
        let (tx, rx) = oneshot::channel();
        let name = guard.slot().name();
        let this = self.clone();
        let policy = self.heal_policy();
        let debug_mode = self.debug_mode();

        let task = tokio::spawn(async move {
            let outcome = this.inner.healer.heal(guard.slot(), policy, debug_mode).await;
            drop(guard);
            // Automatic heals drop the receiver.
            let _ = tx.send(outcome);
        });

        let mut heals = lock(&self.inner.heals);
        heals.retain(|_, handle| !handle.is_finished());
        heals.insert(name, task);
        rx
    }

    fn touch_last_check(&self) {
        *lock(&self.inner.last_check) = Some(Utc::now());
    }

    // ------------------------------------------------------------------------
    // Manual healing
    // ------------------------------------------------------------------------

    /// Heal one endpoint now, regardless of status or restart budget.
    pub async fn heal_one(&self, name: &str) -> Result<HealOutcome, SupervisorError> {
        let slot = self
            .slot(name)
            .ok_or_else(|| SupervisorError::UnknownEndpoint(name.to_string()))?;

        let Some(guard) = slot.try_begin_heal() else {
            return Ok(HealOutcome::AlreadyInProgress);
        };

        info!(endpoint = %name, "Manual heal requested");
        Ok(self.spawn_heal(guard).await.unwrap_or_else(|_| HealOutcome::Failed {
            reason: "Heal task aborted".to_string(),
        }))
    }

    /// Heal every enabled endpoint that is `Offline` or `Failed`, concurrently.
    /// Other enabled endpoints are reported as `Skipped`; disabled ones are omitted.
    pub async fn heal_all(&self) -> BTreeMap<String, HealOutcome> {
        let mut results = BTreeMap::new();
        let mut pending = Vec::new();

        for slot in self.slots() {
            let config = slot.config();
            if !config.enabled {
                continue;
            }
            let status = slot.snapshot().status;
            if status.needs_healing() {
                pending.push(config.name.clone());
            } else {
                results.insert(
                    config.name.clone(),
                    HealOutcome::Skipped { reason: format!("endpoint is {status}") },
                );
            }
        }

        let outcomes = join_all(pending.iter().map(|name| self.heal_one(name))).await;
        for (name, outcome) in pending.into_iter().zip(outcomes) {
            let outcome = outcome.unwrap_or_else(|e| HealOutcome::Failed { reason: e.to_string() });
            results.insert(name, outcome);
        }
        results
    }

    /// Endpoints with a heal currently in flight.
    pub fn active_heals(&self) -> Vec<String> {
        self.slots()
            .iter()
            .filter(|slot| slot.heal_in_flight())
            .map(|slot| slot.name())
            .collect()
    }

    /// Wait for every registered heal task to finish.
    pub async fn join_heals(&self) {
        self.join_heals_until(None).await;
    }

    /// [`join_heals`](Self::join_heals) bounded by `limit`. Returns the
    /// endpoints whose heals were still running when the limit expired; those
    /// stay registered.
    pub async fn drain_heals(&self, limit: Duration) -> Vec<String> {
        let abandoned = self.join_heals_until(Some(Instant::now() + limit)).await;
        for name in &abandoned {
            warn!(endpoint = %name, "Heal still running at shutdown; abandoning it");
        }
        abandoned
    }

    async fn join_heals_until(&self, deadline: Option<Instant>) -> Vec<String> {
        loop {
            let mut handles: Vec<(String, JoinHandle<()>)> =
                lock(&self.inner.heals).drain().collect();
            if handles.is_empty() {
                return Vec::new();
            }

            let joined = join_all(handles.iter_mut().map(|(_, handle)| handle));
            let results = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, joined).await {
                    Ok(results) => results,
                    Err(_) => return self.reregister_unfinished(handles),
                },
                None => joined.await,
            };
            for result in results {
                if let Err(e) = result {
                    warn!(error = %e, "Heal task ended abnormally");
                }
            }
        }
    }

    fn reregister_unfinished(&self, handles: Vec<(String, JoinHandle<()>)>) -> Vec<String> {
        let mut heals = lock(&self.inner.heals);
        let mut unfinished = Vec::new();
        for (name, handle) in handles {
            if !handle.is_finished() {
                unfinished.push(name.clone());
                heals.insert(name, handle);
            }
        }
        unfinished.sort();
        unfinished
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    pub fn status_summary(&self) -> StatusSummary {
        let slots = self.slots();
        let mut endpoints = BTreeMap::new();
        let mut enabled = 0;
        let mut online = 0;

        for slot in &slots {
            let config = slot.config();
            let state = slot.snapshot();
            if config.enabled {
                enabled += 1;
                if state.status == EndpointStatus::Online {
                    online += 1;
                }
            }
            endpoints.insert(config.name.clone(), state);
        }

        StatusSummary {
            overall_status: OverallHealth::from_counts(online, enabled),
            online_endpoints: online,
            total_endpoints: enabled,
            monitoring_active: self.is_running(),
            debug_mode: self.debug_mode(),
            last_check: *lock(&self.inner.last_check),
            endpoints,
            active_heals: self.active_heals(),
            timestamp: Utc::now(),
        }
    }

    /// Receive every status transition from here on.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.inner.events.subscribe()
    }

    pub fn recovery_log(&self) -> &Arc<RecoveryLog> {
        &self.inner.healer.log
    }

    // ------------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------------

    pub fn list_endpoints(&self) -> Vec<EndpointConfig> {
        self.slots().iter().map(|slot| (*slot.config()).clone()).collect()
    }

    /// Register a new endpoint in `Unknown` and persist.
    pub fn add_endpoint(&self, config: EndpointConfig) -> Result<(), SupervisorError> {
        validate_endpoint(&config)?;
        {
            let mut slots = self.inner.slots.write().unwrap_or_else(PoisonError::into_inner);
            if slots.iter().any(|slot| slot.name() == config.name) {
                return Err(SupervisorError::DuplicateEndpoint(config.name));
            }
            info!(endpoint = %config.name, "Endpoint added");
            slots.push(EndpointSlot::new(config, self.inner.events.clone()));
        }
        self.persist();
        Ok(())
    }

    pub fn remove_endpoint(&self, name: &str) -> Result<(), SupervisorError> {
        {
            let mut slots = self.inner.slots.write().unwrap_or_else(PoisonError::into_inner);
            let index = slots
                .iter()
                .position(|slot| slot.name() == name)
                .ok_or_else(|| SupervisorError::UnknownEndpoint(name.to_string()))?;
            slots.remove(index);
        }
        info!(endpoint = %name, "Endpoint removed");
        self.persist();
        Ok(())
    }

    /// Flip an endpoint's `enabled` flag and persist. Returns the new config.
    pub fn set_endpoint_enabled(&self, name: &str, enabled: bool) -> Result<EndpointConfig, SupervisorError> {
        let slot = self
            .slot(name)
            .ok_or_else(|| SupervisorError::UnknownEndpoint(name.to_string()))?;

        let mut config = (*slot.config()).clone();
        config.enabled = enabled;
        slot.replace_config(config.clone());
        info!(endpoint = %name, enabled, "Endpoint enabled flag changed");
        self.persist();
        Ok(config)
    }

    /// Turning debug mode off also clears the session override.
    pub fn set_debug_mode(&self, enabled: bool) {
        {
            let mut settings = lock(&self.inner.settings);
            settings.debug_mode = enabled;
            if !enabled {
                settings.session_debug = false;
            }
        }
        info!(enabled, "Debug mode changed");
        self.persist();
    }

    /// Saved setting or session override.
    pub fn debug_mode(&self) -> bool {
        let settings = self.settings();
        settings.debug_mode || settings.session_debug
    }

    /// Replace settings and endpoints from a reloaded config. States survive for
    /// names still present, new names start `Unknown`, removed names are dropped.
    pub fn apply_config(&self, config: MonitorConfig) -> Result<(), SupervisorError> {
        config.validate()?;
        {
            let mut settings = lock(&self.inner.settings);
            *settings = Settings::from_config(&config, settings.session_debug);
        }

        let mut slots = self.inner.slots.write().unwrap_or_else(PoisonError::into_inner);
        let mut existing: HashMap<String, Arc<EndpointSlot>> =
            slots.drain(..).map(|slot| (slot.name(), slot)).collect();

        *slots = config
            .endpoints
            .into_iter()
            .map(|cfg| match existing.remove(&cfg.name) {
                Some(slot) => {
                    if *slot.config() != cfg {
                        slot.replace_config(cfg);
                    }
                    slot
                }
                None => EndpointSlot::new(cfg, self.inner.events.clone()),
            })
            .collect();

        info!(endpoints = slots.len(), removed = existing.len(), "Configuration applied");
        Ok(())
    }

    /// Current settings plus endpoint configs, as they would be saved.
    pub fn current_config(&self) -> MonitorConfig {
        let settings = self.settings();
        MonitorConfig {
            check_interval_seconds: settings.check_interval_seconds,
            debug_mode: settings.debug_mode,
            verify_attempts: settings.verify_attempts,
            verify_interval_seconds: settings.verify_interval_seconds,
            endpoints: self.list_endpoints(),
        }
    }

    fn persist(&self) {
        let Some(path) = &self.inner.config_path else {
            return;
        };
        if let Err(e) = self.current_config().save_to_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to persist monitor config");
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn slots(&self) -> Vec<Arc<EndpointSlot>> {
        self.inner.slots.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn slot(&self, name: &str) -> Option<Arc<EndpointSlot>> {
        self.slots().into_iter().find(|slot| slot.name() == name)
    }

    fn settings(&self) -> Settings {
        *lock(&self.inner.settings)
    }

    fn heal_policy(&self) -> HealPolicy {
        let settings = self.settings();
        HealPolicy {
            verify_attempts: settings.verify_attempts,
            verify_interval: Duration::from_secs(settings.verify_interval_seconds),
        }
    }
}
