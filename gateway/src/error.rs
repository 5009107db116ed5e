//! Error types for the plates gateway

use std::time::Duration;
use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, PlatesError>;

/// Main error type for the gateway
#[derive(Error, Debug)]
#[allow(clippy::result_large_err)]
pub enum PlatesError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// gRPC transport error
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// gRPC status error
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    /// Sink error (provisioning or write)
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed line in a plates data file
    #[error("data file line {line}: {message}")]
    DataFile { line: usize, message: String },

    /// Metrics error
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Server could not be reached within the connection timeout
    #[error("timed out connecting to {endpoint} after {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },

    /// Call deadline elapsed before the acknowledgment arrived
    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

/// Error type for sink operations
#[derive(Error, Debug)]
pub enum SinkError {
    /// Write attempted before provisioning completed
    #[error("sink not ready")]
    NotReady,

    /// Provisioning failed
    #[error("provisioning failed: {0}")]
    Provision(String),

    /// Store rejected or lost the statement
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<PlatesError> for tonic::Status {
    fn from(err: PlatesError) -> Self {
        match err {
            PlatesError::Config(msg) => tonic::Status::invalid_argument(msg),
            PlatesError::Transport(e) => tonic::Status::unavailable(e.to_string()),
            PlatesError::Grpc(status) => status,
            PlatesError::Sink(SinkError::NotReady) => tonic::Status::unavailable("sink not ready"),
            PlatesError::Sink(e) => tonic::Status::internal(e.to_string()),
            PlatesError::Io(e) => tonic::Status::internal(e.to_string()),
            PlatesError::DataFile { line, message } => {
                tonic::Status::invalid_argument(format!("line {line}: {message}"))
            }
            PlatesError::Metrics(msg) => tonic::Status::internal(format!("metrics: {msg}")),
            PlatesError::ConnectTimeout { endpoint, .. } => {
                tonic::Status::unavailable(format!("connect timeout: {endpoint}"))
            }
            PlatesError::DeadlineExceeded(d) => {
                tonic::Status::deadline_exceeded(format!("deadline of {d:?} exceeded"))
            }
        }
    }
}
