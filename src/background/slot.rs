//! Per-endpoint runtime slot
//!
//! A slot pairs an endpoint's current config with its state and the atomic
//! "heal in flight" flag. All state writes go through the slot's mutex; the
//! flag, not `status`, decides whether a new heal may be dispatched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use chrono::Utc;
use tokio::sync::broadcast;

use crate::probe::ProbeOutcome;
use crate::types::{EndpointConfig, EndpointState, StatusChange};

pub(crate) struct EndpointSlot {
    config: ArcSwap<EndpointConfig>,
    state: Mutex<EndpointState>,
    heal_in_flight: AtomicBool,
    events: broadcast::Sender<StatusChange>,
}

impl EndpointSlot {
    pub fn new(config: EndpointConfig, events: broadcast::Sender<StatusChange>) -> Arc<Self> {
        let state = EndpointState::new(config.name.clone());
        Arc::new(Self {
            config: ArcSwap::from_pointee(config),
            state: Mutex::new(state),
            heal_in_flight: AtomicBool::new(false),
            events,
        })
    }

    pub fn name(&self) -> String {
        self.config.load().name.clone()
    }

    pub fn config(&self) -> Arc<EndpointConfig> {
        self.config.load_full()
    }

    pub fn replace_config(&self, config: EndpointConfig) {
        self.config.store(Arc::new(config));
    }

    pub fn snapshot(&self) -> EndpointState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Mutate state under the lock, broadcasting the transition if `status` changed.
    pub fn update<R>(&self, f: impl FnOnce(&mut EndpointState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let before = state.status;
        let result = f(&mut state);
        if state.status != before {
            // No receivers is fine.
            let _ = self.events.send(StatusChange {
                endpoint: state.name.clone(),
                from: before,
                to: state.status,
                at: Utc::now(),
            });
        }
        result
    }

    /// Apply a poll or check result. Dropped when a heal owns the state, so a
    /// probe racing a freshly dispatched heal cannot overwrite `Recovering`.
    pub fn record_probe(&self, outcome: &ProbeOutcome) -> bool {
        self.update(|state| {
            if self.heal_in_flight() {
                return false;
            }
            if outcome.healthy {
                state.mark_online(outcome.latency_ms);
            } else {
                let reason = outcome.error.clone().unwrap_or_else(|| "Unknown error".to_string());
                state.mark_offline(reason, outcome.latency_ms);
            }
            true
        })
    }

    pub fn heal_in_flight(&self) -> bool {
        self.heal_in_flight.load(Ordering::Acquire)
    }

    /// Claim the heal flag. `None` if a heal is already running.
    pub fn try_begin_heal(self: &Arc<Self>) -> Option<HealGuard> {
        self.heal_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| HealGuard { slot: Arc::clone(self) })
    }
}

/// Holds the heal flag; releases it on drop, including on panic.
pub(crate) struct HealGuard {
    slot: Arc<EndpointSlot>,
}

impl HealGuard {
    pub fn slot(&self) -> &Arc<EndpointSlot> {
        &self.slot
    }
}

impl Drop for HealGuard {
    fn drop(&mut self) {
        self.slot.heal_in_flight.store(false, Ordering::Release);
    }
}
