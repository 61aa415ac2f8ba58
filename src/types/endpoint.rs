//! Endpoint types: EndpointConfig, EndpointStatus, EndpointState

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::defaults;

// ============================================================================
// Endpoint Configuration
// ============================================================================

/// Immutable description of one monitored service.
///
/// Loaded from the monitor config file and replaced wholesale on reload.
/// Durations are stored in whole seconds to match the on-disk format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    /// Unique identifier
    pub name: String,

    /// Scheme, host and port of the service (e.g. `http://localhost:11434`)
    #[serde(rename = "baseURL", alias = "baseUrl")]
    pub base_url: String,

    /// Path appended to `base_url` for the health probe
    pub health_path: String,

    /// Case-insensitive substring matched against process name and command line
    pub process_match: String,

    /// Argument vector used to spawn the service
    pub start_command: Vec<String>,

    /// Optional argument vector used to stop the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_command: Option<Vec<String>>,

    /// Listening port, used by recovery procedures that free a port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Health response body must contain this substring when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_response_substring: Option<String>,

    /// Probe timeout (seconds)
    #[serde(rename = "timeout", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Wait after starting before probing resumes (seconds)
    #[serde(rename = "restartDelay", default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,

    /// Successful heals after which automatic healing stops
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,

    /// Whether the supervisor polls and heals this endpoint
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_timeout_secs() -> u64 {
    defaults::PROBE_TIMEOUT_SECS
}

fn default_restart_delay_secs() -> u64 {
    defaults::RESTART_DELAY_SECS
}

fn default_max_restart_attempts() -> u32 {
    defaults::MAX_RESTART_ATTEMPTS
}

fn default_enabled() -> bool {
    true
}

impl EndpointConfig {
    /// Minimal config with defaults for every optional field.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        health_path: impl Into<String>,
        process_match: impl Into<String>,
        start_command: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            health_path: health_path.into(),
            process_match: process_match.into(),
            start_command,
            stop_command: None,
            port: None,
            expected_response_substring: None,
            timeout_secs: defaults::PROBE_TIMEOUT_SECS,
            restart_delay_secs: defaults::RESTART_DELAY_SECS,
            max_restart_attempts: defaults::MAX_RESTART_ATTEMPTS,
            enabled: true,
        }
    }

    /// Full URL probed by the health check.
    pub fn probe_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.health_path)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }
}

// ============================================================================
// Endpoint Status
// ============================================================================

/// Lifecycle status of a monitored endpoint.
///
/// ```text
/// Unknown ──▶ Online ⇄ Offline ──▶ Recovering ──▶ Online
///                                       └───────▶ Failed ──▶ Recovering
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    #[default]
    Unknown,
    Online,
    Offline,
    Recovering,
    Failed,
}

impl EndpointStatus {
    /// Whether a manual heal-all should pick this endpoint up.
    pub fn needs_healing(self) -> bool {
        matches!(self, Self::Offline | Self::Failed)
    }
}

impl std::fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointStatus::Unknown => write!(f, "unknown"),
            EndpointStatus::Online => write!(f, "online"),
            EndpointStatus::Offline => write!(f, "offline"),
            EndpointStatus::Recovering => write!(f, "recovering"),
            EndpointStatus::Failed => write!(f, "failed"),
        }
    }
}

// ============================================================================
// Endpoint Runtime State
// ============================================================================

/// Mutable runtime record for one endpoint.
///
/// Owned by the supervisor; mutated only by poll passes and heal tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointState {
    pub name: String,
    pub status: EndpointStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    /// Count of successful heals (automatic and manual)
    pub restart_count: u32,
    /// Last observed failure reason, cleared on success
    pub error_message: Option<String>,
    /// Latency of the last probe that got an HTTP response
    pub response_time_ms: Option<f64>,
    /// PID of the last process this monitor started
    pub process_id: Option<u32>,
}

impl EndpointState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: EndpointStatus::Unknown,
            last_check: None,
            last_success: None,
            restart_count: 0,
            error_message: None,
            response_time_ms: None,
            process_id: None,
        }
    }

    /// Record a successful probe.
    pub fn mark_online(&mut self, latency_ms: Option<f64>) {
        let now = Utc::now();
        self.status = EndpointStatus::Online;
        self.last_check = Some(now);
        self.last_success = Some(now);
        self.error_message = None;
        self.response_time_ms = latency_ms;
    }

    /// Record a failed probe.
    pub fn mark_offline(&mut self, reason: String, latency_ms: Option<f64>) {
        self.status = EndpointStatus::Offline;
        self.last_check = Some(Utc::now());
        self.error_message = Some(reason);
        self.response_time_ms = latency_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_url_joins_without_double_slash() {
        let cfg = EndpointConfig::new(
            "Ollama",
            "http://localhost:11434/",
            "/api/tags",
            "ollama",
            vec!["ollama".into(), "serve".into()],
        );
        assert_eq!(cfg.probe_url(), "http://localhost:11434/api/tags");
    }

    #[test]
    fn config_json_uses_camel_case_and_defaults() {
        let json = r#"{
            "name": "LocalAI",
            "baseURL": "http://localhost:8080",
            "healthPath": "/v1/models",
            "processMatch": "local-ai",
            "startCommand": ["local-ai", "--address", ":8080"]
        }"#;
        let cfg: EndpointConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.timeout_secs, defaults::PROBE_TIMEOUT_SECS);
        assert_eq!(cfg.max_restart_attempts, defaults::MAX_RESTART_ATTEMPTS);
        assert!(cfg.enabled);
        assert!(cfg.stop_command.is_none());

        let back = serde_json::to_value(&cfg).unwrap();
        assert_eq!(back["baseURL"], "http://localhost:8080");
        assert_eq!(back["restartDelay"], defaults::RESTART_DELAY_SECS);
        assert!(back.get("stopCommand").is_none());
    }

    #[test]
    fn base_url_alias_is_accepted() {
        let json = r#"{
            "name": "x", "baseUrl": "http://h:1", "healthPath": "/",
            "processMatch": "x", "startCommand": ["x"]
        }"#;
        let cfg: EndpointConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.base_url, "http://h:1");
    }

    #[test]
    fn state_transitions_clear_error_on_success() {
        let mut state = EndpointState::new("svc");
        assert_eq!(state.status, EndpointStatus::Unknown);

        state.mark_offline("Connection refused".into(), None);
        assert_eq!(state.status, EndpointStatus::Offline);
        assert!(state.last_success.is_none());

        state.mark_online(Some(12.5));
        assert_eq!(state.status, EndpointStatus::Online);
        assert!(state.error_message.is_none());
        assert_eq!(state.response_time_ms, Some(12.5));
    }

    #[test]
    fn only_offline_and_failed_need_healing() {
        assert!(EndpointStatus::Offline.needs_healing());
        assert!(EndpointStatus::Failed.needs_healing());
        assert!(!EndpointStatus::Unknown.needs_healing());
        assert!(!EndpointStatus::Recovering.needs_healing());
        assert!(!EndpointStatus::Online.needs_healing());
    }
}
