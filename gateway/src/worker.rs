//! Worker - the single consumer of the ingestion queue
//!
//! Takes records one at a time and hands them to the sink. A sink failure is
//! logged with the record's position in the current cycle and the record is
//! dropped; the worker carries on with the next one.
//!
//! A cycle is a burst of records with no idle gap longer than `idle_timeout`
//! between them. When the queue stays empty for that long the cycle is closed and
//! summarised with its count and elapsed time.

use crate::metrics;
use crate::queue::QueueReceiver;
use crate::record::Record;
use crate::sink::Sink;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Running totals across all cycles
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    failed: AtomicU64,
    cycles: AtomicU64,
}

impl WorkerStats {
    /// Records dispatched to the sink, whatever the outcome
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    /// Records the sink rejected
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    /// Cycles closed so far
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }
}

/// Summary of a finished cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleSummary {
    pub processed: u64,
    pub elapsed: Duration,
}

/// Count and start time of the cycle in progress
#[derive(Debug, Default)]
pub struct Cycle {
    count: u64,
    started: Option<Instant>,
}

impl Cycle {
    /// Account for one more record and return its index within the cycle
    pub fn next_index(&mut self) -> u64 {
        if self.count == 0 {
            self.started = Some(Instant::now());
        }
        let index = self.count;
        self.count += 1;
        index
    }

    /// Close the cycle; None if it saw no records
    pub fn close(&mut self) -> Option<CycleSummary> {
        if self.count == 0 {
            return None;
        }

        let summary = CycleSummary {
            processed: self.count,
            elapsed: self.started.map(|s| s.elapsed()).unwrap_or_default(),
        };
        self.count = 0;
        self.started = None;
        Some(summary)
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

pub struct Worker {
    rx: QueueReceiver,
    sink: Arc<dyn Sink>,
    idle_timeout: Duration,
    cycle: Cycle,
    stats: Arc<WorkerStats>,
}

impl Worker {
    pub fn new(rx: QueueReceiver, sink: Arc<dyn Sink>, idle_timeout: Duration) -> Self {
        Self {
            rx,
            sink,
            idle_timeout,
            cycle: Cycle::default(),
            stats: Arc::new(WorkerStats::default()),
        }
    }

    /// Shared handle on the worker's counters
    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Run the worker on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Drain the queue until every sender is gone
    pub async fn run(mut self) {
        info!(
            sink = self.sink.name(),
            idle_timeout_ms = self.idle_timeout.as_millis() as u64,
            "Worker started"
        );

        loop {
            let next = match tokio::time::timeout(self.idle_timeout, self.rx.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    // queue stayed empty: the burst is over
                    self.close_cycle();
                    self.rx.recv().await
                }
            };

            let Some(record) = next else {
                break;
            };
            self.process(record).await;
        }

        self.close_cycle();
        info!(
            processed = self.stats.processed(),
            failed = self.stats.failed(),
            "Worker stopped"
        );
    }

    async fn process(&mut self, record: Record) {
        let index = self.cycle.next_index();
        self.stats.processed.fetch_add(1, Ordering::SeqCst);

        match self.sink.write(&record).await {
            Ok(()) => {
                metrics::try_record_written(self.sink.name());
                debug!(index, sink = self.sink.name(), "Plate processed");
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
                metrics::try_record_failed(self.sink.name());
                error!(
                    index,
                    sink = self.sink.name(),
                    record = %record,
                    error = %e,
                    "Sink write failed, plate dropped"
                );
            }
        }
    }

    fn close_cycle(&mut self) {
        if let Some(summary) = self.cycle.close() {
            self.stats.cycles.fetch_add(1, Ordering::SeqCst);
            metrics::try_observe_cycle(summary.elapsed.as_secs_f64());
            info!(
                processed = summary.processed,
                elapsed = ?summary.elapsed,
                "Processed {} plates in {:?}",
                summary.processed,
                summary.elapsed
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::queue::ingest_queue;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Sink that records every plate and fails on chosen call numbers
    #[derive(Default)]
    struct ScriptedSink {
        fail_on: Vec<u64>,
        calls: AtomicU64,
        written: Mutex<Vec<Record>>,
    }

    impl ScriptedSink {
        fn failing_on(calls: &[u64]) -> Self {
            Self {
                fail_on: calls.to_vec(),
                ..Default::default()
            }
        }

        fn wells(&self) -> Vec<String> {
            self.written
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.well.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Sink for ScriptedSink {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn write(&self, record: &Record) -> Result<(), SinkError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.contains(&call) {
                return Err(SinkError::Database(sqlx::Error::PoolClosed));
            }
            self.written.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn health(&self) -> bool {
            true
        }
    }

    fn make_record(well: &str) -> Record {
        Record::new(1, well, 10, 0.5, "R1", 0.45)
    }

    #[test]
    fn test_cycle_empty_close_is_none() {
        let mut cycle = Cycle::default();
        assert!(cycle.close().is_none());
    }

    #[test]
    fn test_cycle_counts_and_resets() {
        let mut cycle = Cycle::default();
        assert_eq!(cycle.next_index(), 0);
        assert_eq!(cycle.next_index(), 1);
        assert_eq!(cycle.next_index(), 2);

        let summary = cycle.close().unwrap();
        assert_eq!(summary.processed, 3);
        assert_eq!(cycle.count(), 0);
        assert!(cycle.close().is_none());

        // a new cycle starts indexing from zero again
        assert_eq!(cycle.next_index(), 0);
    }

    #[tokio::test]
    async fn test_worker_drains_queue_into_sink() {
        let (tx, rx) = ingest_queue();
        let sink = Arc::new(ScriptedSink::default());
        let worker = Worker::new(rx, sink.clone(), Duration::from_millis(10));
        let stats = worker.stats();

        for well in ["A1", "A2", "B1"] {
            tx.push(make_record(well));
        }
        drop(tx);

        worker.run().await;

        assert_eq!(stats.processed(), 3);
        assert_eq!(stats.failed(), 0);
        assert_eq!(sink.wells(), vec!["A1", "A2", "B1"]);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_later_records() {
        let (tx, rx) = ingest_queue();
        let sink = Arc::new(ScriptedSink::failing_on(&[1]));
        let worker = Worker::new(rx, sink.clone(), Duration::from_millis(10));
        let stats = worker.stats();

        for well in ["A1", "A2", "A3", "A4"] {
            tx.push(make_record(well));
        }
        drop(tx);

        worker.run().await;

        assert_eq!(stats.processed(), 4);
        assert_eq!(stats.failed(), 1);
        // the failed record is not retried
        assert_eq!(sink.wells(), vec!["A1", "A3", "A4"]);
    }

    #[tokio::test]
    async fn test_idle_gap_closes_cycle() {
        let (tx, rx) = ingest_queue();
        let sink = Arc::new(ScriptedSink::failing_on(&[0]));
        let worker = Worker::new(rx, sink.clone(), Duration::from_millis(10));
        let stats = worker.stats();
        let handle = worker.spawn();

        tx.push(make_record("A1"));
        tx.push(make_record("A2"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stats.cycles(), 1);

        // a failure in the first cycle does not block the next one
        tx.push(make_record("B1"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stats.cycles(), 2);

        drop(tx);
        handle.await.unwrap();

        assert_eq!(stats.processed(), 3);
        assert_eq!(sink.wells(), vec!["A2", "B1"]);
    }

    #[tokio::test]
    async fn test_no_records_no_cycle() {
        let (tx, rx) = ingest_queue();
        let sink = Arc::new(ScriptedSink::default());
        let worker = Worker::new(rx, sink.clone(), Duration::from_millis(5));
        let stats = worker.stats();
        let handle = worker.spawn();

        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(tx);
        handle.await.unwrap();

        assert_eq!(stats.cycles(), 0);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }
}
