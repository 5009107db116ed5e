//! Plates upload client
//!
//! Reads a comma-delimited plates file and streams it to a gateway in one call.
//!
//! ## Environment Variables
//!
//! - `GRPC_SERVER`: gateway address (default: "http://localhost:50051")
//! - `DATAFILE`: plates file (default: "testdata/od-data.csv")
//! - `PLATES_CONNECT_TIMEOUT_SECS`: connection timeout (default: 5)
//! - `PLATES_DEADLINE_SECS`: upload call deadline (default: 60)

use plates_gateway::client::{ClientConfig, IngestClient};
use plates_gateway::datafile;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let start = Instant::now();
    let result = run().await;

    match &result {
        Ok(message) => info!(duration = ?start.elapsed(), "Server response: {message}"),
        Err(e) => error!(duration = ?start.elapsed(), error = %e, "Upload failed"),
    }

    result.map(|_| ())
}

async fn run() -> anyhow::Result<String> {
    let config = ClientConfig::from_env()?;

    let mut client = IngestClient::connect(&config.server, config.connect_timeout).await?;
    let records = datafile::read_records(&config.datafile)?;

    Ok(client.send_plates(records, config.deadline).await?)
}
