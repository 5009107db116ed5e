//! Plates gateway server
//!
//! ## Usage
//!
//! ```bash
//! # Log every received plate
//! cargo run --bin plates-gateway
//!
//! # Persist plates to PostgreSQL
//! OUTPUT=db DB_HOST=localhost cargo run --bin plates-gateway
//! ```
//!
//! ## Environment Variables
//!
//! - `PLATES_GRPC_ADDR`: gRPC server address (default: "0.0.0.0:50051")
//! - `PLATES_METRICS_ADDR`: Metrics server address (default: "0.0.0.0:9090")
//! - `OUTPUT`: `stdout` or `db` (default: "stdout")
//! - `DB_HOST`, `DB_NAME`, `DB_USERNAME`, `DB_PASSWORD`, `DB_PORT`, `DB_TABLE`:
//!   PostgreSQL parameters for `OUTPUT=db`
//! - `PLATES_CYCLE_IDLE_MS`: idle gap that ends a processing cycle (default: 50)
//! - `PLATES_LOG_FORMAT`: `pretty` or `json` (default: "pretty")
//! - `RUST_LOG`: log filter (default: "info")

use plates_gateway::config::{Config, LogFormat};
use plates_gateway::metrics::Metrics;
use plates_gateway::metrics_server::{HealthState, MetricsServer};
use plates_gateway::queue::ingest_queue;
use plates_gateway::server::PlatesService;
use plates_gateway::sink;
use plates_gateway::worker::Worker;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    info!(
        grpc_addr = %config.grpc_addr,
        metrics_addr = %config.metrics_addr,
        output = %config.output,
        "Starting plates gateway"
    );

    Metrics::init()?;

    // Provisioning failures stop the process before it serves anything
    let sink = sink::from_config(&config).await?;

    let (queue, rx) = ingest_queue();
    let health = HealthState::new(Arc::clone(&sink), Arc::clone(queue.stats()));
    let _metrics = MetricsServer::start(config.metrics_addr, health);
    let _worker = Worker::new(rx, Arc::clone(&sink), config.cycle_idle).spawn();

    let service = PlatesService::new(queue, Arc::clone(&sink));

    let listener = TcpListener::bind(config.grpc_addr).await?;
    info!(addr = %listener.local_addr()?, "gRPC server listening");

    service.serve(listener, shutdown_signal()).await?;

    info!("Plates gateway shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = ?e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
