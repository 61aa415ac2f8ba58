//! Control API over the supervisor
//!
//! Mounted under `/api/v1/monitor`; see `routes` for the table. Bodies use
//! the envelope in [`envelope`].

pub mod envelope;
pub mod handlers;
mod routes;

pub use handlers::MonitorApiState;

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Comma-separated origins allowed to call the API from a browser.
pub const CORS_ORIGINS_ENV: &str = "MODEL_SENTINEL_CORS_ORIGINS";

/// Parse a comma-separated origin list, dropping blanks and invalid values.
fn parse_origins(raw: &str) -> Vec<HeaderValue> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect()
}

/// Same-origin only unless [`CORS_ORIGINS_ENV`] lists extra origins.
fn cors_layer() -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    let origins = std::env::var(CORS_ORIGINS_ENV)
        .map(|raw| parse_origins(&raw))
        .unwrap_or_default();
    if origins.is_empty() {
        return layer;
    }
    tracing::info!(count = origins.len(), "CORS enabled for configured origins");
    layer.allow_origin(origins)
}

/// Build the application router.
pub fn create_app(state: MonitorApiState) -> Router {
    Router::new()
        .nest("/api/v1/monitor", routes::monitor_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_list_skips_blanks_and_garbage() {
        let origins = parse_origins(" http://localhost:3000 , ,http://127.0.0.1:5173,bad\norigin");
        assert_eq!(
            origins,
            vec![
                HeaderValue::from_static("http://localhost:3000"),
                HeaderValue::from_static("http://127.0.0.1:5173"),
            ]
        );
    }
}
