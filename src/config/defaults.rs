//! System-wide default constants.
//!
//! Centralises timing and sizing constants used by the supervisor, healer,
//! process controller and recovery procedures. Grouped by subsystem.

// ============================================================================
// Paths
// ============================================================================

/// Monitor config file used when neither `--config` nor `MODEL_SENTINEL_CONFIG` is set.
pub const DEFAULT_CONFIG_PATH: &str = "config/monitor.json";

/// Data directory holding the process lock.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Append-only recovery audit log.
pub const DEFAULT_RECOVERY_LOG_PATH: &str = "data/logs/recovery.jsonl";

// ============================================================================
// Supervisor
// ============================================================================

/// Interval between poll passes (seconds).
pub const CHECK_INTERVAL_SECS: u64 = 30;

/// How long `stop()` waits for the polling loop to finish its pass (seconds).
pub const STOP_JOIN_TIMEOUT_SECS: u64 = 10;

/// How long `--start` waits for in-flight heals before exiting (seconds).
///
/// Covers a full cycle: stop command, grace and force-kill waits, a
/// default restart delay and the verification window.
pub const HEAL_DRAIN_TIMEOUT_SECS: u64 = 120;

/// Buffered status-change events per subscriber before lagging.
pub const STATUS_EVENT_CAPACITY: usize = 256;

// ============================================================================
// Endpoint defaults
// ============================================================================

/// Health probe timeout (seconds).
pub const PROBE_TIMEOUT_SECS: u64 = 5;

/// Wait after spawning a service before verification starts (seconds).
pub const RESTART_DELAY_SECS: u64 = 10;

/// Successful heals after which automatic healing stops.
pub const MAX_RESTART_ATTEMPTS: u32 = 3;

// ============================================================================
// Healer
// ============================================================================

/// Post-start verification probes before a heal is declared failed.
///
/// 6 × 5 s = 30 s verification window.
pub const VERIFY_ATTEMPTS: u32 = 6;

/// Sleep before each verification probe (seconds).
pub const VERIFY_INTERVAL_SECS: u64 = 5;

// ============================================================================
// Process Controller
// ============================================================================

/// Upper bound on a configured stop command (seconds).
pub const STOP_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Grace period after a graceful terminate before survivors are force-killed (seconds).
pub const TERMINATE_GRACE_SECS: u64 = 5;

/// Wait after force-kill before the final re-scan (seconds).
pub const FORCE_KILL_WAIT_SECS: u64 = 2;

// ============================================================================
// Recovery Procedures
// ============================================================================

/// Upper bound on any single repair command (seconds).
pub const RECOVERY_STEP_TIMEOUT_SECS: u64 = 30;

/// Pause between repair steps (seconds).
pub const RECOVERY_STEP_PAUSE_SECS: u64 = 2;

// ============================================================================
// Probe / Recovery log
// ============================================================================

/// Characters of a non-2xx response body kept in the error message.
pub const ERROR_BODY_PREVIEW_CHARS: usize = 100;

/// User-Agent sent with every health probe.
pub const PROBE_USER_AGENT: &str = concat!("model-sentinel/", env!("CARGO_PKG_VERSION"));

/// Recovery log entries kept in memory for the control API.
pub const RECOVERY_LOG_CAPACITY: usize = 500;
