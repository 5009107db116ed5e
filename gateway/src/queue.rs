//! Ingestion queue between the gRPC receiver and the worker
//!
//! Unbounded, FIFO, multi-producer / single-consumer. Producers never block and
//! never see backpressure; the queue keeps nothing across restarts.

use crate::metrics;
use crate::record::Record;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::error;

/// Counters shared by both ends of the queue
#[derive(Debug, Default)]
pub struct QueueStats {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    dropped: AtomicU64,
}

impl QueueStats {
    /// Total records pushed
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Total records taken by the consumer
    pub fn dequeued(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }

    /// Total records pushed after the consumer went away
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Records currently waiting
    pub fn depth(&self) -> u64 {
        self.enqueued().saturating_sub(self.dequeued())
    }
}

/// Create a connected queue sender/receiver pair
pub fn ingest_queue() -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stats = Arc::new(QueueStats::default());

    (
        QueueSender {
            tx,
            stats: Arc::clone(&stats),
        },
        QueueReceiver { rx, stats },
    )
}

/// Producer side; cheap to clone
#[derive(Clone)]
pub struct QueueSender {
    tx: mpsc::UnboundedSender<Record>,
    stats: Arc<QueueStats>,
}

impl QueueSender {
    /// Hand a record to the worker without waiting
    ///
    /// If the worker is gone the record is logged and counted as dropped.
    pub fn push(&self, record: Record) {
        match self.tx.send(record) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                metrics::try_set_queue_depth(self.stats.depth());
            }
            Err(mpsc::error::SendError(record)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::try_record_dropped("worker_gone", 1);
                error!(record = %record, "Ingestion queue closed, plate dropped");
            }
        }
    }

    pub fn stats(&self) -> &Arc<QueueStats> {
        &self.stats
    }

    pub fn depth(&self) -> u64 {
        self.stats.depth()
    }
}

/// Consumer side, owned by the worker
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<Record>,
    stats: Arc<QueueStats>,
}

impl QueueReceiver {
    /// Wait for the next record
    ///
    /// Returns None once every sender has been dropped and the queue is empty.
    pub async fn recv(&mut self) -> Option<Record> {
        let record = self.rx.recv().await;
        if record.is_some() {
            self.on_dequeue();
        }
        record
    }

    /// Take the next record if one is waiting
    pub fn try_recv(&mut self) -> Option<Record> {
        let record = self.rx.try_recv().ok();
        if record.is_some() {
            self.on_dequeue();
        }
        record
    }

    pub fn stats(&self) -> &Arc<QueueStats> {
        &self.stats
    }

    fn on_dequeue(&self) {
        self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
        metrics::try_set_queue_depth(self.stats.depth());
    }
}
