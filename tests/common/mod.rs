//! Fakes for the supervisor's capability traits.
//!
//! Every fake appends `"<action>:<endpoint>"` to a shared journal so tests can
//! assert on the order of terminate / repair / start / probe calls.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use model_sentinel::process::ProcessError;
use model_sentinel::{
    EndpointConfig, HealthProbe, MonitorConfig, ProbeOutcome, ProcessController,
    RecoveryProcedure, RepairReport, Supervisor,
};

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// Journal entries for one endpoint, with the endpoint suffix stripped.
pub fn actions_for(journal: &Journal, endpoint: &str) -> Vec<String> {
    let suffix = format!(":{endpoint}");
    journal
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| e.strip_suffix(&suffix).map(str::to_string))
        .collect()
}

pub fn count(journal: &Journal, entry: &str) -> usize {
    journal.lock().unwrap().iter().filter(|e| *e == entry).count()
}

// ============================================================================
// Probe
// ============================================================================

/// Probe that replays a per-endpoint script, then repeats a fallback.
pub struct ScriptedProbe {
    journal: Journal,
    scripts: Mutex<HashMap<String, VecDeque<bool>>>,
    fallback: Mutex<HashMap<String, bool>>,
}

impl ScriptedProbe {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            scripts: Mutex::new(HashMap::new()),
            fallback: Mutex::new(HashMap::new()),
        }
    }

    /// Results returned in order, then `fallback` forever.
    pub fn script(&self, endpoint: &str, results: &[bool], fallback: bool) {
        self.scripts
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), results.iter().copied().collect());
        self.fallback.lock().unwrap().insert(endpoint.to_string(), fallback);
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, endpoint: &EndpointConfig) -> ProbeOutcome {
        self.journal.lock().unwrap().push(format!("probe:{}", endpoint.name));
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&endpoint.name)
            .and_then(VecDeque::pop_front);
        let healthy = next.unwrap_or_else(|| {
            *self.fallback.lock().unwrap().get(&endpoint.name).unwrap_or(&false)
        });

        if healthy {
            ProbeOutcome::healthy(1.0)
        } else {
            ProbeOutcome {
                healthy: false,
                error: Some("Connection refused - service likely offline".to_string()),
                latency_ms: None,
            }
        }
    }
}

// ============================================================================
// Process controller
// ============================================================================

pub struct FakeProcesses {
    journal: Journal,
    pub fail_terminate: Mutex<HashSet<String>>,
    pub missing_executable: Mutex<HashSet<String>>,
    /// When set, `start` waits for a permit before returning
    pub start_gate: Option<Arc<Semaphore>>,
}

impl FakeProcesses {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            fail_terminate: Mutex::new(HashSet::new()),
            missing_executable: Mutex::new(HashSet::new()),
            start_gate: None,
        }
    }

    pub fn gated(journal: Journal, gate: Arc<Semaphore>) -> Self {
        Self { start_gate: Some(gate), ..Self::new(journal) }
    }
}

#[async_trait]
impl ProcessController for FakeProcesses {
    async fn terminate(&self, endpoint: &EndpointConfig) -> Result<(), ProcessError> {
        self.journal.lock().unwrap().push(format!("terminate:{}", endpoint.name));
        if self.fail_terminate.lock().unwrap().contains(&endpoint.name) {
            return Err(ProcessError::TerminationFailed { pids: vec![4242] });
        }
        Ok(())
    }

    async fn start(&self, endpoint: &EndpointConfig) -> Result<Option<u32>, ProcessError> {
        if let Some(gate) = &self.start_gate {
            let _permit = gate.acquire().await;
        }
        self.journal.lock().unwrap().push(format!("start:{}", endpoint.name));
        if self.missing_executable.lock().unwrap().contains(&endpoint.name) {
            return Err(ProcessError::ExecutableNotFound(endpoint.start_command[0].clone()));
        }
        Ok(Some(1000))
    }
}

// ============================================================================
// Recovery
// ============================================================================

pub struct FakeRecovery {
    journal: Journal,
}

impl FakeRecovery {
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

#[async_trait]
impl RecoveryProcedure for FakeRecovery {
    async fn run(&self, endpoint: &EndpointConfig) -> RepairReport {
        self.journal.lock().unwrap().push(format!("repair:{}", endpoint.name));
        RepairReport { attempted: 1, failed: 0 }
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub fn endpoint(name: &str) -> EndpointConfig {
    let mut cfg = EndpointConfig::new(
        name,
        "http://127.0.0.1:9",
        "/health",
        name.to_lowercase(),
        vec![name.to_lowercase(), "serve".to_string()],
    );
    cfg.restart_delay_secs = 0;
    cfg.timeout_secs = 1;
    cfg
}

/// Config with zero verification delay.
pub fn config(endpoints: Vec<EndpointConfig>) -> MonitorConfig {
    MonitorConfig {
        check_interval_seconds: 3600,
        debug_mode: false,
        verify_attempts: 3,
        verify_interval_seconds: 0,
        endpoints,
    }
}

pub struct Harness {
    pub supervisor: Supervisor,
    pub journal: Journal,
    pub probe: Arc<ScriptedProbe>,
    pub processes: Arc<FakeProcesses>,
}

pub fn harness(config: MonitorConfig) -> Harness {
    let journal = journal();
    let processes = Arc::new(FakeProcesses::new(journal.clone()));
    harness_with(config, journal, processes)
}

pub fn harness_with(config: MonitorConfig, journal: Journal, processes: Arc<FakeProcesses>) -> Harness {
    let probe = Arc::new(ScriptedProbe::new(journal.clone()));
    let supervisor = Supervisor::builder(config)
        .probe(probe.clone())
        .process_controller(processes.clone())
        .recovery(Arc::new(FakeRecovery::new(journal.clone())))
        .build()
        .unwrap();
    Harness { supervisor, journal, probe, processes }
}
