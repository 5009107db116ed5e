//! Sinks persist plate records
//!
//! Exactly one sink is chosen at startup from [`SinkKind`] and never changes.
//! Sinks are only ever driven by the worker, one record at a time.

pub mod console;
pub mod relational;

use crate::config::{Config, SinkKind};
use crate::error::{Result, SinkError};
use crate::metrics;
use crate::record::Record;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub use console::ConsoleSink;
pub use relational::RelationalSink;

/// Sink trait - persists Records
///
/// # Example
///
/// ```ignore
/// struct MySink;
///
/// #[async_trait]
/// impl Sink for MySink {
///     fn name(&self) -> &'static str { "mine" }
///
///     async fn write(&self, record: &Record) -> Result<(), SinkError> {
///         store(record).await?;
///         Ok(())
///     }
///
///     async fn health(&self) -> bool { true }
/// }
/// ```
#[async_trait]
pub trait Sink: Send + Sync {
    /// Sink name for identification and logging
    fn name(&self) -> &'static str;

    /// One-time setup before the first write
    ///
    /// Must be idempotent: calling it again after success is a no-op.
    async fn provision(&self) -> std::result::Result<(), SinkError> {
        Ok(())
    }

    /// Persist a single record
    ///
    /// Failures are returned to the caller and never retried here.
    async fn write(&self, record: &Record) -> std::result::Result<(), SinkError>;

    /// Whether the sink can currently accept writes
    async fn health(&self) -> bool;

    /// Release connections on shutdown
    async fn shutdown(&self) -> std::result::Result<(), SinkError> {
        Ok(())
    }
}

/// Build and provision the sink selected by the configuration
///
/// A provisioning failure is returned so the process never starts serving.
pub async fn from_config(config: &Config) -> Result<Arc<dyn Sink>> {
    let sink: Arc<dyn Sink> = match config.output {
        SinkKind::Stdout => Arc::new(ConsoleSink::new()),
        SinkKind::Db => Arc::new(RelationalSink::new(config.db.clone())),
    };

    sink.provision().await?;
    metrics::try_set_sink_ready(true);
    info!(sink = sink.name(), "Sink ready");

    Ok(sink)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_stdout() {
        let sink = from_config(&Config::default()).await.unwrap();
        assert_eq!(sink.name(), "stdout");
        assert!(sink.health().await);
    }

    #[tokio::test]
    async fn test_from_config_db_fails_when_store_unreachable() {
        let mut config = Config {
            output: SinkKind::Db,
            ..Config::default()
        };
        config.db.host = "127.0.0.1".to_string();
        config.db.port = 1;
        config.db.connect_timeout = std::time::Duration::from_millis(200);

        assert!(from_config(&config).await.is_err());
    }
}
