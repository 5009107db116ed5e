//! HTTP side channel for operators
//!
//! Serves the Prometheus registry on `/metrics` and a readiness probe on
//! `/health` that asks the active sink, the same way the gRPC `Health` call does.
//! A sink that is unprovisioned or closed answers 503.

use crate::queue::QueueStats;
use crate::sink::Sink;
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// What `/health` reports on
#[derive(Clone)]
pub struct HealthState {
    sink: Arc<dyn Sink>,
    queue: Arc<QueueStats>,
}

impl HealthState {
    pub fn new(sink: Arc<dyn Sink>, queue: Arc<QueueStats>) -> Self {
        Self { sink, queue }
    }
}

/// Metrics HTTP server
pub struct MetricsServer;

impl MetricsServer {
    /// Start serving on `addr` until aborted or the process exits
    pub fn start(addr: SocketAddr, state: HealthState) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(%addr, sink = state.sink.name(), "Metrics server starting");

            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(error = %e, %addr, "Failed to bind metrics server");
                    return;
                }
            };

            if let Err(e) = axum::serve(listener, router(state)).await {
                error!(error = %e, "Metrics server error");
            }
        })
    }
}

fn router(state: HealthState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn metrics_handler() -> impl IntoResponse {
    let body = crate::metrics::gather();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

async fn health_handler(State(state): State<HealthState>) -> (StatusCode, String) {
    let sink = state.sink.name();
    let depth = state.queue.depth();

    if state.sink.health().await {
        (StatusCode::OK, format!("OK sink={sink} queue_depth={depth}\n"))
    } else {
        warn!(sink, queue_depth = depth, "Health check failed, sink unavailable");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("UNAVAILABLE sink={sink} queue_depth={depth}\n"),
        )
    }
}
