//! Health probing
//!
//! One probe is one HTTP GET against `baseURL + healthPath`. Probes are
//! read-only and safe to run concurrently for different endpoints. The
//! `HealthProbe` trait is the seam the supervisor and healer depend on, so
//! tests substitute scripted probes for the HTTP implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::config::defaults::{ERROR_BODY_PREVIEW_CHARS, PROBE_USER_AGENT};
use crate::types::EndpointConfig;

// ============================================================================
// Outcome Types
// ============================================================================

/// Why a probe counted as unhealthy. All variants drive the endpoint to Offline.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProbeError {
    #[error("Connection refused - service likely offline")]
    Refused,

    #[error("Request timeout after {0}s")]
    Timeout(u64),

    #[error("HTTP {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("Unexpected response content")]
    ContentMismatch,

    #[error("Request error: {0}")]
    Transport(String),
}

/// Result of one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub healthy: bool,
    /// Human-readable failure reason when unhealthy
    pub error: Option<String>,
    /// Round-trip latency when the service produced an HTTP response
    pub latency_ms: Option<f64>,
}

impl ProbeOutcome {
    pub fn healthy(latency_ms: f64) -> Self {
        Self { healthy: true, error: None, latency_ms: Some(latency_ms) }
    }

    pub fn unhealthy(error: &ProbeError, latency_ms: Option<f64>) -> Self {
        Self { healthy: false, error: Some(error.to_string()), latency_ms }
    }
}

/// Performs one health check against an endpoint.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, endpoint: &EndpointConfig) -> ProbeOutcome;
}

// ============================================================================
// HTTP Probe
// ============================================================================

/// `HealthProbe` backed by a shared `reqwest` client.
///
/// The per-endpoint timeout is applied per request, so one client serves
/// every endpoint.
#[derive(Clone)]
pub struct HttpProbe {
    http: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(PROBE_USER_AGENT)
            .build()?;
        Ok(Self { http })
    }

    /// Run the request and classify it; latency accompanies any HTTP response.
    async fn check(&self, endpoint: &EndpointConfig) -> Result<f64, (ProbeError, Option<f64>)> {
        let url = endpoint.probe_url();
        let started = Instant::now();

        let response = self
            .http
            .get(&url)
            .timeout(endpoint.timeout())
            .send()
            .await
            .map_err(|e| (classify_transport(&e, endpoint.timeout()), None))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| (classify_transport(&e, endpoint.timeout()), None))?;
        let latency_ms = elapsed_ms(started.elapsed());

        if !status.is_success() {
            return Err((
                ProbeError::BadStatus {
                    status: status.as_u16(),
                    body: truncate_chars(&body, ERROR_BODY_PREVIEW_CHARS),
                },
                Some(latency_ms),
            ));
        }

        match &endpoint.expected_response_substring {
            Some(expected) if !body.contains(expected.as_str()) => {
                Err((ProbeError::ContentMismatch, Some(latency_ms)))
            }
            _ => Ok(latency_ms),
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, endpoint: &EndpointConfig) -> ProbeOutcome {
        match self.check(endpoint).await {
            Ok(latency_ms) => ProbeOutcome::healthy(latency_ms),
            Err((error, latency_ms)) => {
                debug!(endpoint = %endpoint.name, url = %endpoint.probe_url(), error = %error, "Probe failed");
                ProbeOutcome::unhealthy(&error, latency_ms)
            }
        }
    }
}

/// Map a transport-level `reqwest` failure onto the probe taxonomy.
fn classify_transport(error: &reqwest::Error, timeout: Duration) -> ProbeError {
    if error.is_timeout() {
        ProbeError::Timeout(timeout.as_secs())
    } else if error.is_connect() {
        ProbeError::Refused
    } else {
        ProbeError::Transport(error.to_string())
    }
}

fn elapsed_ms(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

/// Truncate on a char boundary.
fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn endpoint(base_url: &str, path: &str) -> EndpointConfig {
        let mut cfg = EndpointConfig::new("svc", base_url, path, "svc", vec!["svc".into()]);
        cfg.timeout_secs = 1;
        cfg
    }

    #[tokio::test]
    async fn healthy_when_body_contains_expected_substring() {
        let base = serve(Router::new().route("/api/tags", get(|| async { r#"{"models":[]}"# }))).await;
        let mut cfg = endpoint(&base, "/api/tags");
        cfg.expected_response_substring = Some("models".into());

        let outcome = HttpProbe::new().unwrap().probe(&cfg).await;
        assert!(outcome.healthy, "{outcome:?}");
        assert!(outcome.error.is_none());
        assert!(outcome.latency_ms.unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn content_mismatch_is_unhealthy_with_latency() {
        let base = serve(Router::new().route("/health", get(|| async { "loading" }))).await;
        let mut cfg = endpoint(&base, "/health");
        cfg.expected_response_substring = Some("ready".into());

        let outcome = HttpProbe::new().unwrap().probe(&cfg).await;
        assert!(!outcome.healthy);
        assert_eq!(outcome.error.as_deref(), Some("Unexpected response content"));
        assert!(outcome.latency_ms.is_some());
    }

    #[tokio::test]
    async fn non_2xx_reports_status_and_truncated_body() {
        let long_body = "x".repeat(500);
        let base = serve(Router::new().route(
            "/health",
            get(move || {
                let body = long_body.clone();
                async move { (StatusCode::SERVICE_UNAVAILABLE, body) }
            }),
        ))
        .await;

        let outcome = HttpProbe::new().unwrap().probe(&endpoint(&base, "/health")).await;
        assert!(!outcome.healthy);
        let error = outcome.error.unwrap();
        assert!(error.starts_with("HTTP 503: "), "{error}");
        assert_eq!(error.len(), "HTTP 503: ".len() + ERROR_BODY_PREVIEW_CHARS);
    }

    #[tokio::test]
    async fn connection_refused_is_classified() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let outcome = HttpProbe::new()
            .unwrap()
            .probe(&endpoint(&format!("http://{addr}"), "/health"))
            .await;
        assert!(!outcome.healthy);
        assert!(outcome.error.unwrap().contains("refused"));
        assert!(outcome.latency_ms.is_none());
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let base = serve(Router::new().route(
            "/health",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        ))
        .await;

        let outcome = HttpProbe::new().unwrap().probe(&endpoint(&base, "/health")).await;
        assert!(!outcome.healthy);
        assert_eq!(outcome.error.as_deref(), Some("Request timeout after 1s"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("ok", 100), "ok");
    }
}
