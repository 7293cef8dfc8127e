//! latticed - Lattice Daemon.
//!
//! CRDT state synchronization server for browser peers.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use latticed::config::{self, Config, LogFormat};
use latticed::metrics;
use latticed::network::Gateway;
use latticed::state::Core;

/// Resolve the configuration path from CLI arguments.
/// Supports `-c <path>`, `--config <path>`, or a bare path.
/// Falls back to `latticed.toml` when no argument is provided.
fn resolve_config_path() -> (String, bool) {
    let mut args = std::env::args().skip(1);

    match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => {
            let path = args.next().unwrap_or_else(|| {
                eprintln!("Missing path after {}", flag);
                std::process::exit(1);
            });
            (path, true)
        }
        Some(path) => (path, true),
        None => ("latticed.toml".to_string(), false),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first (before tracing, so we can use log_format).
    // An absent default config file means "run with documented defaults";
    // an explicitly named file must exist.
    let (config_path, explicit) = resolve_config_path();
    let config = if Path::new(&config_path).exists() {
        Config::load(&config_path).map_err(|e| {
            eprintln!("ERROR: Failed to load config from {}: {}", config_path, e);
            e
        })?
    } else if explicit {
        anyhow::bail!("config file not found: {config_path}");
    } else {
        Config::default()
    };

    // Initialize tracing based on config
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match config.server.log_format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .init();
        }
    }

    // Validate configuration
    if let Err(errors) = config::validate(&config) {
        for err in &errors {
            error!(error = %err, "Configuration validation failed");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    info!(
        bind = %config.server.bind,
        default_kind = %config.server.default_kind,
        "Starting latticed"
    );

    // Initialize metrics and serve them if enabled
    metrics::init();
    let metrics_port = config.server.metrics_port;
    if metrics_port > 0 {
        tokio::spawn(metrics::serve(metrics_port));
    }

    let bind_addr = config.bind_addr()?;
    let core = Arc::new(Core::new(config)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let gateway = Gateway::bind(bind_addr, core, shutdown_rx).await?;

    // Orderly shutdown on ctrl-c: sessions receive the signal and send
    // close frames before the process exits.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    gateway.run().await?;

    info!("latticed stopped");
    Ok(())
}
