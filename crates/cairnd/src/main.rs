//! cairnd — runs one Cairn worker over TCP.

use std::sync::Arc;

use anyhow::{Context, Result};

use cairn_core::config::CairnConfig;
use cairn_services::{FunctionRegistry, TcpTransport};
use cairnd::{Worker, WorkerOptions};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = CairnConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = CairnConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CairnConfig::default()
    });

    // An address on the command line wins over the config file.
    let mut options = WorkerOptions::from_config(&config.worker);
    if let Some(address) = std::env::args().nth(1) {
        options = options.address(address);
    }
    tracing::info!(
        host = %config.network.host,
        scheduler = %config.worker.scheduler,
        "cairnd starting"
    );

    let transport = Arc::new(TcpTransport::new(config.network.host.clone()));
    let registry = Arc::new(FunctionRegistry::with_builtins());
    tracing::info!(functions = ?registry.names(), "function registry ready");

    let worker = Worker::start(transport, registry, options)
        .await
        .context("failed to start worker")?;
    println!("{}", worker.address());

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            worker.close();
        }
        _ = worker.closed() => tracing::info!("worker closed by request"),
    }

    worker.join().await.context("worker loop failed")?;
    Ok(())
}
