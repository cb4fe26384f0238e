//! SGW Daemon - concurrent sensor-ingestion gateway
//!
//! Listens on a TCP port for sensor devices, ingests their readings
//! and persists them to SQLite with deduplication.
//!
//! # Usage
//!
//! ```bash
//! # Listen on port 12345
//! sgwd 12345
//!
//! # Custom database and report log locations
//! SGW_DB_PATH=/var/lib/sgw/sensor_data.db SGW_REPORT_LOG=/var/log/gateway.log sgwd 12345
//!
//! # Enable debug logging
//! RUST_LOG=sgwd=debug sgwd 12345
//! ```
//!
//! # Signal Handling
//!
//! SIGTERM/SIGINT: stop accepting, wait for session handlers and the
//! storage cycle, exit 0.

use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sgwd::config::GatewayConfig;
use sgwd::logsink::spawn_report_log_task;
use sgwd::registry::SensorRegistry;
use sgwd::server::GatewayServer;
use sgwd::storage::{spawn_storage_task, StorageEngine};

/// Sensor-ingestion gateway daemon
#[derive(Parser, Debug)]
#[command(name = "sgwd", version, about)]
struct Args {
    /// TCP port to listen on for sensor devices
    port: u16,
}

fn main() -> Result<()> {
    let args = Args::parse();
    run_gateway(args)
}

/// Runs the gateway (async entry point).
#[tokio::main]
async fn run_gateway(args: Args) -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("sgwd=info".parse()?)
                .add_directive("sgw_core=info".parse()?)
                .add_directive("sgw_protocol=info".parse()?),
        )
        .init();

    let config = GatewayConfig::new(args.port);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        port = config.port,
        "Sensor gateway starting"
    );

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // Setup signal handlers
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    // Shared state: registry and storage engine, each behind its own lock
    let registry = Arc::new(SensorRegistry::new(config.capacity));
    let storage = Arc::new(StorageEngine::new(&config.db_path));

    // The initial store open is fatal; later outages are retried by
    // the periodic cycle.
    storage
        .connect()
        .with_context(|| format!("cannot open database at {}", config.db_path.display()))?;

    // Report log collaborator
    let (report_log, log_handle) =
        spawn_report_log_task(config.report_log_path.clone(), cancel_token.clone());

    // Periodic reconnect/flush cycle
    let storage_handle = spawn_storage_task(
        Arc::clone(&storage),
        Arc::clone(&registry),
        config.flush_interval,
        cancel_token.clone(),
    );

    // Bind and run the connection manager; a bind failure is fatal.
    let server = GatewayServer::bind(
        config.clone(),
        Arc::clone(&registry),
        Arc::clone(&storage),
        report_log,
        cancel_token.clone(),
    )
    .await
    .context("failed to start connection manager")?;

    info!(port = config.port, "Server started");
    server.run().await;

    // Join the long-lived tasks before exiting.
    if let Err(e) = storage_handle.await {
        error!(error = %e, "Storage task failed to join");
    }
    if let Err(e) = log_handle.await {
        error!(error = %e, "Report log task failed to join");
    }

    info!("Sensor gateway stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
