//! Prometheus metrics for the plates gateway

use crate::error::{PlatesError, Result};
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, TextEncoder, histogram_opts, register_counter,
    register_counter_vec, register_gauge, register_histogram,
};
use std::sync::OnceLock;

/// Global metrics instance
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// All gateway metrics
pub struct Metrics {
    /// Plates received over gRPC streams
    pub records_received: Counter,

    /// Plates written by a sink (by sink)
    pub records_written: CounterVec,

    /// Plates a sink failed to write (by sink)
    pub records_failed: CounterVec,

    /// Plates lost before reaching a sink (by reason)
    pub records_dropped: CounterVec,

    /// Current ingestion queue depth
    pub queue_depth: Gauge,

    /// Open SendPlates streams
    pub active_streams: Gauge,

    /// Duration of worker processing cycles
    pub cycle_duration: Histogram,

    /// Sink readiness (1 = ready, 0 = not ready)
    pub sink_ready: Gauge,
}

impl Metrics {
    /// Initialize metrics (call once at startup)
    ///
    /// Returns error if metric registration fails.
    #[allow(clippy::result_large_err)]
    pub fn init() -> Result<&'static Metrics> {
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let metrics = Metrics {
            records_received: register_counter!(
                "plates_records_received_total",
                "Total plates received over gRPC streams"
            )
            .map_err(|e| PlatesError::Metrics(format!("records_received: {e}")))?,

            records_written: register_counter_vec!(
                "plates_records_written_total",
                "Total plates written by the sink",
                &["sink"]
            )
            .map_err(|e| PlatesError::Metrics(format!("records_written: {e}")))?,

            records_failed: register_counter_vec!(
                "plates_records_failed_total",
                "Total plates the sink failed to write",
                &["sink"]
            )
            .map_err(|e| PlatesError::Metrics(format!("records_failed: {e}")))?,

            records_dropped: register_counter_vec!(
                "plates_records_dropped_total",
                "Total plates dropped before reaching the sink",
                &["reason"]
            )
            .map_err(|e| PlatesError::Metrics(format!("records_dropped: {e}")))?,

            queue_depth: register_gauge!("plates_queue_depth", "Plates waiting in the queue")
                .map_err(|e| PlatesError::Metrics(format!("queue_depth: {e}")))?,

            active_streams: register_gauge!(
                "plates_active_streams",
                "Number of open SendPlates streams"
            )
            .map_err(|e| PlatesError::Metrics(format!("active_streams: {e}")))?,

            cycle_duration: register_histogram!(histogram_opts!(
                "plates_cycle_duration_seconds",
                "Duration of worker processing cycles",
                vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
            ))
            .map_err(|e| PlatesError::Metrics(format!("cycle_duration: {e}")))?,

            sink_ready: register_gauge!(
                "plates_sink_ready",
                "Sink readiness (1 = ready, 0 = not ready)"
            )
            .map_err(|e| PlatesError::Metrics(format!("sink_ready: {e}")))?,
        };

        // Set the metrics (only succeeds once)
        let _ = METRICS.set(metrics);

        METRICS
            .get()
            .ok_or_else(|| PlatesError::Metrics("Failed to initialize metrics".to_string()))
    }

    /// Get the global metrics instance
    ///
    /// Returns None if metrics haven't been initialized yet.
    pub fn get() -> Option<&'static Metrics> {
        METRICS.get()
    }
}

/// Gather all metrics and encode as Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_ok() {
        String::from_utf8(buffer).unwrap_or_default()
    } else {
        String::new()
    }
}

// Recording helpers are no-ops until `Metrics::init` has run, so library users
// and tests never need a registry.

pub fn try_record_received(count: u64) {
    if let Some(m) = Metrics::get() {
        m.records_received.inc_by(count as f64);
    }
}

pub fn try_record_written(sink: &str) {
    if let Some(m) = Metrics::get() {
        m.records_written.with_label_values(&[sink]).inc();
    }
}

pub fn try_record_failed(sink: &str) {
    if let Some(m) = Metrics::get() {
        m.records_failed.with_label_values(&[sink]).inc();
    }
}

pub fn try_record_dropped(reason: &str, count: u64) {
    if let Some(m) = Metrics::get() {
        m.records_dropped
            .with_label_values(&[reason])
            .inc_by(count as f64);
    }
}

pub fn try_set_queue_depth(depth: u64) {
    if let Some(m) = Metrics::get() {
        m.queue_depth.set(depth as f64);
    }
}

pub fn try_observe_cycle(seconds: f64) {
    if let Some(m) = Metrics::get() {
        m.cycle_duration.observe(seconds);
    }
}

pub fn try_set_sink_ready(ready: bool) {
    if let Some(m) = Metrics::get() {
        m.sink_ready.set(if ready { 1.0 } else { 0.0 });
    }
}

pub fn try_inc_streams() {
    if let Some(m) = Metrics::get() {
        m.active_streams.inc();
    }
}

pub fn try_dec_streams() {
    if let Some(m) = Metrics::get() {
        m.active_streams.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_init() {
        // init() may race with other tests, so only check get() after any successful init
        let _ = Metrics::init();
        if let Some(metrics) = Metrics::get() {
            metrics.records_received.inc_by(3.0);
            metrics.queue_depth.set(3.0);
            assert!(gather().contains("plates_records_received_total"));
        }
    }

    #[test]
    fn test_helpers_do_not_panic() {
        try_record_received(1);
        try_record_written("stdout");
        try_record_failed("db");
        try_record_dropped("worker_gone", 1);
        try_set_queue_depth(0);
        try_observe_cycle(0.01);
        try_set_sink_ready(true);
        try_inc_streams();
        try_dec_streams();
    }
}
