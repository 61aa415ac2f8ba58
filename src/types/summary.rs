//! Supervisor-facing outputs: status summary, transitions, heal outcomes

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EndpointState, EndpointStatus};

// ============================================================================
// Aggregate Health
// ============================================================================

/// Aggregate health across all enabled endpoints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    /// Every enabled endpoint is online
    Healthy,
    /// Some, but not all, enabled endpoints are online
    Degraded,
    /// No enabled endpoint is online
    Critical,
}

impl OverallHealth {
    pub fn from_counts(online: usize, enabled: usize) -> Self {
        if online >= enabled {
            Self::Healthy
        } else if online > 0 {
            Self::Degraded
        } else {
            Self::Critical
        }
    }
}

impl std::fmt::Display for OverallHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverallHealth::Healthy => write!(f, "healthy"),
            OverallHealth::Degraded => write!(f, "degraded"),
            OverallHealth::Critical => write!(f, "critical"),
        }
    }
}

/// Snapshot returned by `Supervisor::status_summary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub overall_status: OverallHealth,
    pub online_endpoints: usize,
    pub total_endpoints: usize,
    pub monitoring_active: bool,
    pub debug_mode: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub endpoints: BTreeMap<String, EndpointState>,
    /// Endpoints with a heal task currently in flight
    pub active_heals: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Status Transitions
// ============================================================================

/// One status transition, broadcast to `Supervisor::subscribe` receivers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusChange {
    pub endpoint: String,
    pub from: EndpointStatus,
    pub to: EndpointStatus,
    pub at: DateTime<Utc>,
}

// ============================================================================
// Heal Outcome
// ============================================================================

/// Result of one heal request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum HealOutcome {
    /// Restarted and confirmed healthy on the given verification attempt
    Healed { verify_attempt: u32, pid: Option<u32> },
    /// The heal cycle ended in `Failed`
    Failed { reason: String },
    /// Another heal for this endpoint was already running
    AlreadyInProgress,
    /// Nothing to do (endpoint healthy or not in a healable state)
    Skipped { reason: String },
}

impl HealOutcome {
    /// Healed or nothing needed doing.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Healed { .. } | Self::Skipped { .. })
    }
}

impl std::fmt::Display for HealOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealOutcome::Healed { verify_attempt, .. } => {
                write!(f, "healed (verified on attempt {})", verify_attempt)
            }
            HealOutcome::Failed { reason } => write!(f, "failed: {}", reason),
            HealOutcome::AlreadyInProgress => write!(f, "heal already in progress"),
            HealOutcome::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_health_from_counts() {
        assert_eq!(OverallHealth::from_counts(3, 3), OverallHealth::Healthy);
        assert_eq!(OverallHealth::from_counts(1, 3), OverallHealth::Degraded);
        assert_eq!(OverallHealth::from_counts(0, 3), OverallHealth::Critical);
        assert_eq!(OverallHealth::from_counts(0, 0), OverallHealth::Healthy);
    }

    #[test]
    fn heal_outcome_serializes_with_tag() {
        let v = serde_json::to_value(HealOutcome::Healed { verify_attempt: 2, pid: Some(42) })
            .unwrap();
        assert_eq!(v["outcome"], "healed");
        assert_eq!(v["verifyAttempt"], 2);
        assert_eq!(v["pid"], 42);

        let v = serde_json::to_value(HealOutcome::AlreadyInProgress).unwrap();
        assert_eq!(v["outcome"], "already_in_progress");
    }

    #[test]
    fn skipped_counts_as_success() {
        assert!(HealOutcome::Skipped { reason: "online".into() }.is_success());
        assert!(!HealOutcome::Failed { reason: "x".into() }.is_success());
        assert!(!HealOutcome::AlreadyInProgress.is_success());
    }
}
