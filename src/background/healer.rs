//! Healer: the terminate → repair → start → verify cycle for one endpoint
//!
//! Owns the `Recovering → {Online, Failed}` transitions. Every step is written
//! to the recovery log; operational logging stays at summary level.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::slot::EndpointSlot;
use crate::probe::HealthProbe;
use crate::process::ProcessController;
use crate::recovery::RecoveryProcedure;
use crate::storage::{RecoveryAction, RecoveryLog};
use crate::types::{EndpointStatus, HealOutcome};

/// Verification bounds for a heal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HealPolicy {
    pub verify_attempts: u32,
    pub verify_interval: Duration,
}

pub(crate) struct Healer {
    pub probe: Arc<dyn HealthProbe>,
    pub processes: Arc<dyn ProcessController>,
    pub recovery: Arc<dyn RecoveryProcedure>,
    pub log: Arc<RecoveryLog>,
}

impl Healer {
    /// Run one heal. The caller holds the slot's heal guard for the duration.
    pub async fn heal(&self, slot: &EndpointSlot, policy: HealPolicy, debug_mode: bool) -> HealOutcome {
        let config = slot.config();
        let name = config.name.as_str();

        info!(endpoint = %name, "Starting heal");
        self.log.info(name, RecoveryAction::HealStarted, format!("Starting healing process for {name}"));
        slot.update(|state| {
            state.status = EndpointStatus::Recovering;
            state.error_message = Some("Attempting automatic recovery".to_string());
        });

        if let Err(e) = self.processes.terminate(&config).await {
            return self.fail(slot, name, format!("Failed to terminate {name}: {e}"));
        }

        if debug_mode {
            let report = self.recovery.run(&config).await;
            if report.failed > 0 {
                self.log.warn(
                    name,
                    RecoveryAction::Repair,
                    format!("{} of {} repair steps failed", report.failed, report.attempted),
                );
            }
        }

        let pid = match self.processes.start(&config).await {
            Ok(pid) => pid,
            Err(e) => return self.fail(slot, name, format!("Failed to start {name}: {e}")),
        };
        slot.update(|state| state.process_id = pid);

        tokio::time::sleep(config.restart_delay()).await;

        for attempt in 1..=policy.verify_attempts {
            tokio::time::sleep(policy.verify_interval).await;

            let outcome = self.probe.probe(&config).await;
            if outcome.healthy {
                let restart_count = slot.update(|state| {
                    state.mark_online(outcome.latency_ms);
                    state.restart_count += 1;
                    state.restart_count
                });
                self.log.info(
                    name,
                    RecoveryAction::HealSucceeded,
                    format!("{name} successfully healed and is online (verify attempt {attempt})"),
                );
                info!(endpoint = %name, restart_count, attempt, "Heal succeeded");
                return HealOutcome::Healed { verify_attempt: attempt, pid };
            }

            self.log.info(
                name,
                RecoveryAction::Verify,
                format!(
                    "Verification attempt {attempt}/{} for {name}: {}",
                    policy.verify_attempts,
                    outcome.error.as_deref().unwrap_or("unhealthy")
                ),
            );
        }

        self.fail(slot, name, "Service started but health check failed".to_string())
    }

    fn fail(&self, slot: &EndpointSlot, name: &str, reason: String) -> HealOutcome {
        slot.update(|state| {
            state.status = EndpointStatus::Failed;
            state.error_message = Some(reason.clone());
        });
        self.log.error(name, RecoveryAction::HealFailed, reason.clone());
        warn!(endpoint = %name, reason = %reason, "Heal failed");
        HealOutcome::Failed { reason }
    }
}
