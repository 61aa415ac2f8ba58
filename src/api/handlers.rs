//! Monitor control handlers
//!
//! Thin adapters over [`Supervisor`]; errors flow through [`ApiError`].

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::envelope::{ApiResult, Envelope};
use crate::background::Supervisor;
use crate::storage::RecoveryEntry;
use crate::types::{EndpointConfig, HealOutcome, StatusSummary};

/// Shared state for the control API.
#[derive(Clone)]
pub struct MonitorApiState {
    pub supervisor: Supervisor,
}

impl MonitorApiState {
    pub fn new(supervisor: Supervisor) -> Self {
        Self { supervisor }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleResponse {
    /// Whether this call changed the loop's state
    pub changed: bool,
    pub monitoring_active: bool,
}

#[derive(Debug, Serialize)]
pub struct HealAllResponse {
    pub success: bool,
    pub results: std::collections::BTreeMap<String, HealOutcome>,
}

// ============================================================================
// Status and lifecycle
// ============================================================================

/// GET /api/v1/monitor/status
pub async fn get_status(State(state): State<MonitorApiState>) -> Envelope<StatusSummary> {
    Envelope(state.supervisor.status_summary())
}

/// POST /api/v1/monitor/start
pub async fn start_monitoring(State(state): State<MonitorApiState>) -> Envelope<LifecycleResponse> {
    let changed = state.supervisor.start();
    Envelope(LifecycleResponse { changed, monitoring_active: state.supervisor.is_running() })
}

/// POST /api/v1/monitor/stop
pub async fn stop_monitoring(State(state): State<MonitorApiState>) -> Envelope<LifecycleResponse> {
    let changed = state.supervisor.stop().await;
    Envelope(LifecycleResponse { changed, monitoring_active: state.supervisor.is_running() })
}

// ============================================================================
// Healing
// ============================================================================

/// POST /api/v1/monitor/heal: every enabled offline or failed endpoint
pub async fn heal_all(State(state): State<MonitorApiState>) -> Envelope<HealAllResponse> {
    let results = state.supervisor.heal_all().await;
    let success = results.values().all(HealOutcome::is_success);
    Envelope(HealAllResponse { success, results })
}

/// POST /api/v1/monitor/heal/:name
pub async fn heal_one(
    State(state): State<MonitorApiState>,
    Path(name): Path<String>,
) -> ApiResult<HealOutcome> {
    Ok(Envelope(state.supervisor.heal_one(&name).await?))
}

// ============================================================================
// Endpoint management
// ============================================================================

/// GET /api/v1/monitor/endpoints
pub async fn list_endpoints(State(state): State<MonitorApiState>) -> Envelope<Vec<EndpointConfig>> {
    Envelope(state.supervisor.list_endpoints())
}

/// POST /api/v1/monitor/endpoints
pub async fn add_endpoint(
    State(state): State<MonitorApiState>,
    Json(config): Json<EndpointConfig>,
) -> ApiResult<EndpointConfig> {
    state.supervisor.add_endpoint(config.clone())?;
    Ok(Envelope(config))
}

/// DELETE /api/v1/monitor/endpoints/:name
pub async fn remove_endpoint(
    State(state): State<MonitorApiState>,
    Path(name): Path<String>,
) -> ApiResult<serde_json::Value> {
    state.supervisor.remove_endpoint(&name)?;
    Ok(Envelope(serde_json::json!({ "removed": name })))
}

/// POST /api/v1/monitor/endpoints/:name/enable
pub async fn enable_endpoint(
    State(state): State<MonitorApiState>,
    Path(name): Path<String>,
) -> ApiResult<EndpointConfig> {
    Ok(Envelope(state.supervisor.set_endpoint_enabled(&name, true)?))
}

/// POST /api/v1/monitor/endpoints/:name/disable
pub async fn disable_endpoint(
    State(state): State<MonitorApiState>,
    Path(name): Path<String>,
) -> ApiResult<EndpointConfig> {
    Ok(Envelope(state.supervisor.set_endpoint_enabled(&name, false)?))
}

// ============================================================================
// Debug mode and recovery log
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DebugModeRequest {
    pub enabled: bool,
}

/// POST /api/v1/monitor/debug
pub async fn set_debug_mode(
    State(state): State<MonitorApiState>,
    Json(request): Json<DebugModeRequest>,
) -> Envelope<serde_json::Value> {
    state.supervisor.set_debug_mode(request.enabled);
    Envelope(serde_json::json!({ "debugMode": state.supervisor.debug_mode() }))
}

#[derive(Debug, Deserialize)]
pub struct RecoveryLogQuery {
    pub limit: Option<usize>,
    pub endpoint: Option<String>,
}

/// GET /api/v1/monitor/recovery-log?limit=N&endpoint=NAME
///
/// Oldest first; `limit` keeps the newest N after filtering.
pub async fn recovery_log(
    State(state): State<MonitorApiState>,
    Query(query): Query<RecoveryLogQuery>,
) -> Envelope<Vec<RecoveryEntry>> {
    let log = state.supervisor.recovery_log();
    let mut entries = match &query.endpoint {
        Some(endpoint) => log.entries_for(endpoint),
        None => log.recent(None),
    };
    if let Some(limit) = query.limit {
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
    }
    Envelope(entries)
}
