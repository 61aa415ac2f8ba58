//! Monitor API route table.

use axum::routing::{delete, get, post};
use axum::Router;

use super::handlers::{self, MonitorApiState};

/// Routes mounted under `/api/v1/monitor`.
pub fn monitor_routes(state: MonitorApiState) -> Router {
    Router::new()
        // Status and lifecycle
        .route("/status", get(handlers::get_status))
        .route("/start", post(handlers::start_monitoring))
        .route("/stop", post(handlers::stop_monitoring))
        // Healing
        .route("/heal", post(handlers::heal_all))
        .route("/heal/:name", post(handlers::heal_one))
        // Endpoints
        .route("/endpoints", get(handlers::list_endpoints).post(handlers::add_endpoint))
        .route("/endpoints/:name", delete(handlers::remove_endpoint))
        .route("/endpoints/:name/enable", post(handlers::enable_endpoint))
        .route("/endpoints/:name/disable", post(handlers::disable_endpoint))
        // Debug and audit
        .route("/debug", post(handlers::set_debug_mode))
        .route("/recovery-log", get(handlers::recovery_log))
        .with_state(state)
}
