//! Plates gateway - streaming ingestion of plate/well optical density readings
//!
//! Clients stream plates over gRPC. The receiver hands each plate to an unbounded
//! in-memory queue and acknowledges the number received once the stream ends; a
//! single worker drains the queue into the configured sink (console or PostgreSQL).
//!
//! # Architecture
//!
//! ```text
//! gRPC stream ──► PlatesService ──► ingestion queue ──► Worker ──► Sink
//! ```
//!
//! The acknowledgment counts plates *received*. Persistence runs asynchronously
//! and its per-plate failures are only logged, never reported to the caller.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod client;
pub mod config;
pub mod datafile;
pub mod error;
pub mod metrics;
pub mod metrics_server;
pub mod queue;
pub mod record;
pub mod server;
pub mod sink;
pub mod worker;

// Re-export proto types
pub mod proto {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]
    #![allow(clippy::derive_partial_eq_without_eq)]
    tonic::include_proto!("plates.v1");
}

pub use config::{Config, SinkKind};
pub use error::{PlatesError, Result, SinkError};
pub use queue::{QueueReceiver, QueueSender, ingest_queue};
pub use record::Record;
pub use server::PlatesService;
pub use sink::{ConsoleSink, RelationalSink, Sink};
pub use worker::{Worker, WorkerStats};
