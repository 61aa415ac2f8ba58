//! model-sentinel: self-healing monitor for local model services
//!
//! # Usage
//!
//! ```bash
//! # Print a live status summary as JSON
//! model-sentinel --status
//!
//! # Heal every offline or failed endpoint once
//! model-sentinel --heal
//!
//! # Run the monitoring loop with the control API on port 8089
//! model-sentinel --start --serve 127.0.0.1:8089
//! ```
//!
//! # Environment Variables
//!
//! - `MODEL_SENTINEL_CONFIG`: Path to the monitor config (default: `config/monitor.json`)
//! - `MODEL_SENTINEL_CORS_ORIGINS`: Comma-separated origins allowed to call the API
//! - `RUST_LOG`: Logging level (default: info)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use model_sentinel::api::{create_app, MonitorApiState};
use model_sentinel::config::defaults::{
    DEFAULT_CONFIG_PATH, DEFAULT_DATA_DIR, DEFAULT_RECOVERY_LOG_PATH, HEAL_DRAIN_TIMEOUT_SECS,
};
use model_sentinel::config::watcher::{run_config_watcher, ConfigEvent};
use model_sentinel::config::{ConfigSource, MonitorConfig};
use model_sentinel::storage::{ProcessLock, RecoveryLog};
use model_sentinel::Supervisor;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "model-sentinel")]
#[command(about = "Self-healing monitor for locally hosted model services")]
#[command(version)]
struct CliArgs {
    /// Run the monitoring loop until interrupted
    #[arg(long)]
    start: bool,

    /// Heal every offline or failed endpoint once and print the results as JSON
    #[arg(long)]
    heal: bool,

    /// Probe every endpoint once and print the status summary as JSON
    #[arg(long)]
    status: bool,

    /// Enable destructive recovery procedures for this session
    #[arg(long)]
    debug: bool,

    /// Monitor config file (created with defaults if missing)
    #[arg(long, env = "MODEL_SENTINEL_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serve the control API on this address (with --start)
    #[arg(long, value_name = "HOST:PORT", requires = "start")]
    serve: Option<String>,

    /// Recovery audit log (JSON Lines)
    #[arg(long, default_value = DEFAULT_RECOVERY_LOG_PATH)]
    recovery_log: PathBuf,

    /// Directory holding the single-instance lock
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // Logs go to stderr so --status / --heal JSON on stdout stays parseable.
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }
}

// ============================================================================
// Monitor Mode
// ============================================================================

/// Run until Ctrl+C: polling loop, config watcher and optional control API.
async fn run_monitor(args: &CliArgs, supervisor: Supervisor) -> Result<()> {
    let _process_lock = ProcessLock::acquire(&args.data_dir)
        .context("Failed to acquire process lock")?;

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let mut tasks = JoinSet::new();

    // Config hot reload
    let (config_tx, mut config_rx) = mpsc::channel(8);
    tasks.spawn(run_config_watcher(args.config.clone(), config_tx, cancel_token.clone()));
    {
        let supervisor = supervisor.clone();
        tasks.spawn(async move {
            while let Some(event) = config_rx.recv().await {
                match event {
                    ConfigEvent::Reloaded(config) => {
                        if let Err(e) = supervisor.apply_config(config) {
                            warn!(error = %e, "Reloaded config rejected; keeping previous configuration");
                        }
                    }
                    ConfigEvent::Error(e) => {
                        warn!(error = %e, "Config reload failed; keeping previous configuration");
                    }
                }
            }
        });
    }

    // Control API
    if let Some(addr) = &args.serve {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind control API on {addr}"))?;
        info!(addr = %addr, "Control API listening on /api/v1/monitor");

        let app = create_app(MonitorApiState::new(supervisor.clone()));
        let token = cancel_token.clone();
        tasks.spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "Control API server error");
            }
        });
    }

    supervisor.start();
    cancel_token.cancelled().await;
    supervisor.stop().await;

    let abandoned = supervisor
        .drain_heals(Duration::from_secs(HEAL_DRAIN_TIMEOUT_SECS))
        .await;
    if !abandoned.is_empty() {
        warn!(endpoints = ?abandoned, "Exiting with heals still in flight");
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.log_json);

    if !(args.start || args.heal || args.status) {
        CliArgs::command().print_help()?;
        return Ok(());
    }

    let (config, source) = MonitorConfig::load_or_init(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;
    if source != ConfigSource::File {
        info!(path = %args.config.display(), "Using built-in default endpoints");
    }
    if args.debug {
        warn!("Debug mode enabled: heals will run destructive recovery procedures");
    }

    let recovery_log = RecoveryLog::open(&args.recovery_log).with_context(|| {
        format!("Failed to open recovery log {}", args.recovery_log.display())
    })?;

    let supervisor = Supervisor::builder(config)
        .config_path(args.config.clone())
        .session_debug(args.debug)
        .recovery_log(Arc::new(recovery_log))
        .build()
        .context("Failed to build supervisor")?;

    if args.status {
        supervisor.check_all().await;
        println!("{}", serde_json::to_string_pretty(&supervisor.status_summary())?);
    }

    if args.heal {
        supervisor.check_all().await;
        let results = supervisor.heal_all().await;
        supervisor.join_heals().await;
        println!("{}", serde_json::to_string_pretty(&results)?);
    }

    if args.start {
        run_monitor(&args, supervisor).await?;
        info!("model-sentinel shutdown complete");
    }

    Ok(())
}
