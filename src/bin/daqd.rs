//! Data-acquisition daemon entrypoint.
//!
//! Loads a fleet configuration, starts one bus worker per physical bus,
//! decodes every poll pass through a fixed worker pool, and dispatches the
//! decoded snapshots to a sink (log by default, HTTP if configured). A
//! config file change triggers a hot reload without restarting the process.

use clap::Parser;
use daqd::adapter::AdapterRegistry;
use daqd::decode::DEFAULT_WORKERS;
use daqd::dispatch::{DispatchRegistry, HttpDispatcher};
use daqd::manager::Manager;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Raw-result channel capacity between bus workers and the decode pool.
const DEFAULT_RAW_CHANNEL_CAPACITY: usize = 100;

#[derive(Parser)]
#[command(name = "daqd")]
#[command(about = "Industrial field-device Modbus data-acquisition daemon")]
struct Cli {
    /// Path to the fleet configuration JSON document.
    #[arg(long, short = 'c')]
    config: PathBuf,

    /// Log level filter, e.g. "info", "daqd=debug", honored alongside RUST_LOG.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of decode pool workers.
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    decode_workers: usize,

    /// Bounded channel capacity between bus workers and the decode pool.
    #[arg(long, default_value_t = DEFAULT_RAW_CHANNEL_CAPACITY)]
    raw_channel_capacity: usize,

    /// HTTP endpoint to dispatch decoded snapshots to; if unset the log
    /// sink remains the default.
    #[arg(long)]
    http_sink_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    info!(config = %cli.config.display(), "starting daqd");

    let adapters = AdapterRegistry::with_builtins().await;
    let dispatch = Arc::new(DispatchRegistry::with_builtins().await);
    if let Some(url) = &cli.http_sink_url {
        dispatch
            .register("http", Arc::new(HttpDispatcher::new(url.clone())))
            .await;
        dispatch.set_default("http").await;
        info!(url = %url, "using http dispatch sink");
    }

    let (snapshot_tx, mut snapshot_rx) = mpsc::channel(cli.raw_channel_capacity.max(1));

    let mut manager = Manager::new(
        cli.config.clone(),
        adapters,
        snapshot_tx,
        cli.raw_channel_capacity,
        cli.decode_workers,
    );

    if let Err(e) = manager.reload().await {
        anyhow::bail!("initial fleet config load failed: {e}");
    }

    let dispatch_task = {
        let dispatch = dispatch.clone();
        tokio::spawn(async move {
            while let Some(snapshot) = snapshot_rx.recv().await {
                match dispatch.default_sink().await {
                    Ok(sink) => {
                        if let Err(e) = sink.dispatch(&snapshot).await {
                            error!(device = %snapshot.device_name, error = %e, "dispatch failed");
                        }
                    }
                    Err(e) => error!(error = %e, "no dispatch sink available"),
                }
            }
        })
    };

    let manager = Arc::new(tokio::sync::Mutex::new(manager));
    let watch_task = {
        let manager = manager.clone();
        let config_path = cli.config.clone();
        tokio::spawn(async move {
            daqd::manager::watch_and_reload(config_path, || {
                let manager = manager.clone();
                async move { manager.lock().await.reload().await }
            })
            .await;
        })
    };

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping");

    watch_task.abort();
    manager.lock().await.shutdown().await;
    dispatch_task.abort();

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
