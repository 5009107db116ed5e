//! Console sink
//!
//! Logs one structured line per plate. Needs no setup and has no failure mode of
//! its own.

use crate::error::SinkError;
use crate::record::Record;
use crate::sink::Sink;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Console sink - logs every plate
pub struct ConsoleSink {
    /// Count of plates written
    written_count: AtomicU64,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            written_count: AtomicU64::new(0),
        }
    }

    /// Get total plates written
    pub fn written_count(&self) -> u64 {
        self.written_count.load(Ordering::Relaxed)
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for ConsoleSink {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn write(&self, record: &Record) -> Result<(), SinkError> {
        info!(
            plate = record.plate,
            well = %record.well,
            runtime = record.runtime,
            optical_density = record.optical_density,
            run = %record.run,
            corrected_optical_density = record.corrected_optical_density,
            "Plate"
        );

        self.written_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn health(&self) -> bool {
        true
    }
}
