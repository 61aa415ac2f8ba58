//! Monitor Configuration Module
//!
//! Loads the endpoint set and supervisor settings from a JSON file.
//!
//! ## Loading Order
//!
//! 1. `--config PATH` on the command line
//! 2. `MODEL_SENTINEL_CONFIG` environment variable
//! 3. `config/monitor.json` in the current working directory
//!
//! A missing or malformed file falls back to the built-in defaults, which are
//! written back to the same path. The loaded value is handed to the
//! supervisor; there is no global config.
//!
//! ```ignore
//! let (config, _source) = MonitorConfig::load_or_init(&path)?;
//! let supervisor = Supervisor::builder(config).config_path(path).build();
//! ```

mod monitor_config;
pub mod defaults;
pub mod watcher;

pub use monitor_config::*;
