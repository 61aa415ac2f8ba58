//! Monitor Configuration - endpoint set and supervisor settings as JSON
//!
//! The file is the only state that survives a monitor restart. A missing or
//! malformed file is replaced by the built-in defaults, which are written back
//! so the next start is deterministic.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::defaults;
use crate::types::EndpointConfig;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    /// Seconds between poll passes
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,

    /// Enables destructive recovery procedures during heals
    #[serde(default)]
    pub debug_mode: bool,

    /// Post-start verification probes per heal
    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,

    /// Seconds slept before each verification probe
    #[serde(default = "default_verify_interval")]
    pub verify_interval_seconds: u64,

    /// Monitored services
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

fn default_check_interval() -> u64 {
    defaults::CHECK_INTERVAL_SECS
}

fn default_verify_attempts() -> u32 {
    defaults::VERIFY_ATTEMPTS
}

fn default_verify_interval() -> u64 {
    defaults::VERIFY_INTERVAL_SECS
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: defaults::CHECK_INTERVAL_SECS,
            debug_mode: false,
            verify_attempts: defaults::VERIFY_ATTEMPTS,
            verify_interval_seconds: defaults::VERIFY_INTERVAL_SECS,
            endpoints: default_endpoints(),
        }
    }
}

/// Where a loaded config came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Parsed from the existing file
    File,
    /// File was absent; defaults were written
    DefaultsCreated,
    /// File was unreadable as config; defaults were written over it
    DefaultsAfterError,
}

impl MonitorConfig {
    /// Load from `path`, falling back to defaults on a missing or malformed file.
    ///
    /// Only an I/O failure reading an existing file is returned as an error.
    /// Failing to persist the defaults is logged and otherwise ignored.
    pub fn load_or_init(path: &Path) -> Result<(Self, ConfigSource), ConfigError> {
        let source = match Self::load_from_file(path) {
            Ok(config) => {
                info!(
                    path = %path.display(),
                    endpoints = config.endpoints.len(),
                    "Loaded monitor configuration"
                );
                return Ok((config, ConfigSource::File));
            }
            Err(ConfigError::Io(_, ref e)) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No monitor config found, creating defaults");
                ConfigSource::DefaultsCreated
            }
            Err(e @ ConfigError::Io(..)) => return Err(e),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid monitor config, falling back to defaults");
                ConfigSource::DefaultsAfterError
            }
        };

        let config = Self::default();
        if let Err(e) = config.save_to_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to persist default config");
        }
        Ok((config, source))
    }

    /// Load and validate a specific file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Write to `path`, creating parent directories.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_json()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::Io(parent.to_path_buf(), e))?;
        }
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Monitor config saved");
        Ok(())
    }

    /// Validate settings and every endpoint; collects all problems.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.check_interval_seconds == 0 {
            errors.push("checkIntervalSeconds must be > 0".to_string());
        }
        if self.verify_attempts == 0 {
            errors.push("verifyAttempts must be > 0".to_string());
        }

        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            if !seen.insert(endpoint.name.as_str()) {
                errors.push(format!("duplicate endpoint name '{}'", endpoint.name));
            }
            errors.extend(endpoint_errors(endpoint));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Validate a single endpoint (also used by `Supervisor::add_endpoint`).
pub fn validate_endpoint(endpoint: &EndpointConfig) -> Result<(), ConfigError> {
    let errors = endpoint_errors(endpoint);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors))
    }
}

fn endpoint_errors(endpoint: &EndpointConfig) -> Vec<String> {
    let mut errors = Vec::new();
    let name = if endpoint.name.trim().is_empty() {
        errors.push("endpoint name must not be empty".to_string());
        "<unnamed>"
    } else {
        endpoint.name.as_str()
    };

    match reqwest::Url::parse(&endpoint.base_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(format!(
            "{name}: baseURL scheme must be http or https, got '{}'",
            url.scheme()
        )),
        Err(e) => errors.push(format!("{name}: invalid baseURL '{}': {e}", endpoint.base_url)),
    }
    if !endpoint.health_path.starts_with('/') {
        errors.push(format!("{name}: healthPath must start with '/'"));
    }
    if endpoint.process_match.trim().is_empty() {
        errors.push(format!("{name}: processMatch must not be empty"));
    }
    if endpoint.start_command.first().map_or(true, |p| p.trim().is_empty()) {
        errors.push(format!("{name}: startCommand must name an executable"));
    }
    if matches!(&endpoint.stop_command, Some(cmd) if cmd.is_empty()) {
        errors.push(format!("{name}: stopCommand must not be empty when set"));
    }
    if endpoint.timeout_secs == 0 {
        errors.push(format!("{name}: timeout must be > 0"));
    }
    errors
}

// ============================================================================
// Built-in Defaults
// ============================================================================

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

/// Default endpoint set for the common local model runtimes.
pub fn default_endpoints() -> Vec<EndpointConfig> {
    let windows = cfg!(windows);

    let mut ollama = EndpointConfig::new(
        "Ollama",
        "http://localhost:11434",
        "/api/tags",
        "ollama",
        if windows { argv(&["ollama.exe", "serve"]) } else { argv(&["ollama", "serve"]) },
    );
    ollama.stop_command = Some(if windows {
        argv(&["taskkill", "/F", "/IM", "ollama.exe"])
    } else {
        argv(&["pkill", "-f", "ollama"])
    });
    ollama.port = Some(11434);
    ollama.timeout_secs = 10;

    let mut lm_studio = EndpointConfig::new(
        "LM_Studio",
        "http://localhost:1234",
        "/v1/models",
        "lmstudio",
        if windows {
            argv(&["lmstudio.exe", "server", "start"])
        } else {
            argv(&["lmstudio", "server", "start"])
        },
    );
    lm_studio.port = Some(1234);

    let mut local_ai = EndpointConfig::new(
        "LocalAI",
        "http://localhost:8080",
        "/v1/models",
        "local-ai",
        if windows {
            argv(&["local-ai.exe", "--address", ":8080"])
        } else {
            argv(&["local-ai", "--address", ":8080"])
        },
    );
    local_ai.port = Some(8080);

    // Matches every python process, so it stays off until an operator narrows it.
    let mut oobabooga = EndpointConfig::new(
        "Oobabooga",
        "http://localhost:5000",
        "/api/v1/model",
        "python",
        argv(&["python", "server.py", "--api"]),
    );
    oobabooga.port = Some(5000);
    oobabooga.timeout_secs = 8;
    oobabooga.enabled = false;

    vec![ollama, lm_studio, local_ai, oobabooga]
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error for {}: {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Parse error in {}: {1}", .0.display())]
    Parse(PathBuf, #[source] serde_json::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let config = MonitorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.endpoints.len(), 4);
        assert!(!config.endpoints.iter().find(|e| e.name == "Oobabooga").unwrap().enabled);
    }

    #[test]
    fn missing_file_creates_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/monitor.json");

        let (config, source) = MonitorConfig::load_or_init(&path).unwrap();
        assert_eq!(source, ConfigSource::DefaultsCreated);
        assert_eq!(config, MonitorConfig::default());
        assert!(path.exists());

        // Second load reads the persisted defaults back.
        let (again, source) = MonitorConfig::load_or_init(&path).unwrap();
        assert_eq!(source, ConfigSource::File);
        assert_eq!(again, config);
    }

    #[test]
    fn malformed_file_is_replaced_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("monitor.json");
        std::fs::write(&path, "{ not json").unwrap();

        let (config, source) = MonitorConfig::load_or_init(&path).unwrap();
        assert_eq!(source, ConfigSource::DefaultsAfterError);
        assert_eq!(config, MonitorConfig::default());

        let on_disk = MonitorConfig::load_from_file(&path).unwrap();
        assert_eq!(on_disk, config);
    }

    #[test]
    fn unreadable_path_is_an_error() {
        let dir = tempdir().unwrap();
        // A directory cannot be read as a file.
        let result = MonitorConfig::load_or_init(dir.path());
        assert!(matches!(result, Err(ConfigError::Io(..))));
    }

    #[test]
    fn validation_collects_every_problem() {
        let mut bad = EndpointConfig::new("a", "ftp://host", "health", "", vec![]);
        bad.timeout_secs = 0;
        let dup = EndpointConfig::new("a", "http://h:1", "/", "a", vec!["a".into()]);
        let config = MonitorConfig {
            check_interval_seconds: 0,
            endpoints: vec![bad, dup],
            ..MonitorConfig::default()
        };

        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.contains("checkIntervalSeconds")));
                assert!(errors.iter().any(|e| e.contains("duplicate endpoint name 'a'")));
                assert!(errors.iter().any(|e| e.contains("scheme")));
                assert!(errors.iter().any(|e| e.contains("healthPath")));
                assert!(errors.iter().any(|e| e.contains("processMatch")));
                assert!(errors.iter().any(|e| e.contains("startCommand")));
                assert!(errors.iter().any(|e| e.contains("timeout")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn optional_settings_default_when_absent() {
        let json = r#"{ "checkIntervalSeconds": 15, "debugMode": true, "endpoints": [] }"#;
        let config: MonitorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.check_interval_seconds, 15);
        assert!(config.debug_mode);
        assert_eq!(config.verify_attempts, defaults::VERIFY_ATTEMPTS);
        assert_eq!(config.verify_interval_seconds, defaults::VERIFY_INTERVAL_SECS);
    }
}
