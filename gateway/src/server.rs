//! gRPC server for the plates gateway
//!
//! Implements the Plates service defined in proto/v1/plates.proto.
//!
//! `SendPlates` only receives: every plate is pushed onto the ingestion queue and
//! the call is acknowledged with the number of plates received once the client
//! closes the stream. Persistence happens later on the worker, so the
//! acknowledgment says nothing about whether any plate was stored. Callers see
//! either a transport/deadline failure of the whole call or that count.

use crate::metrics;
use crate::proto::{
    HealthRequest, HealthResponse, PlateRequest, PlateResponse,
    plates_server::{Plates, PlatesServer},
};
use crate::queue::QueueSender;
use crate::record::Record;
use crate::sink::Sink;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::net::TcpListener;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tracing::{error, info, warn};

/// Acknowledgment text for a completed stream
pub fn acknowledgment(received: u64) -> String {
    format!("Received {received} Plates, Now Processing ...")
}

/// Plates gRPC service implementation
pub struct PlatesService {
    queue: QueueSender,
    sink: Arc<dyn Sink>,
    start_time: Instant,
    records_received: Arc<AtomicU64>,
}

impl PlatesService {
    pub fn new(queue: QueueSender, sink: Arc<dyn Sink>) -> Self {
        Self {
            queue,
            sink,
            start_time: Instant::now(),
            records_received: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create a tonic server from this service
    pub fn into_server(self) -> PlatesServer<Self> {
        PlatesServer::new(self)
    }

    /// Total plates received across all streams
    pub fn records_received(&self) -> u64 {
        self.records_received.load(Ordering::Relaxed)
    }

    /// Accept calls on `listener` until `signal` resolves
    ///
    /// Streams already open when the signal fires run to completion. The sink is
    /// shut down only after they have, so their plates still reach the queue
    /// against a live sink. Plates left on the queue are not drained.
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> crate::Result<()>
    where
        F: Future<Output = ()>,
    {
        let sink = Arc::clone(&self.sink);
        let incoming = Box::pin(futures::stream::unfold(listener, |listener| async move {
            let conn = listener.accept().await.map(|(stream, _)| stream);
            Some((conn, listener))
        }));

        Server::builder()
            .add_service(self.into_server())
            .serve_with_incoming_shutdown(incoming, signal)
            .await?;

        if let Err(e) = sink.shutdown().await {
            error!(sink = sink.name(), error = %e, "Error during sink shutdown");
        }
        Ok(())
    }
}

/// Keeps the active-stream gauge honest on every exit path
struct StreamGuard;

impl StreamGuard {
    fn open() -> Self {
        metrics::try_inc_streams();
        StreamGuard
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        metrics::try_dec_streams();
    }
}

#[tonic::async_trait]
impl Plates for PlatesService {
    async fn send_plates(
        &self,
        request: Request<Streaming<PlateRequest>>,
    ) -> Result<Response<PlateResponse>, Status> {
        let _guard = StreamGuard::open();
        let remote = request.remote_addr();
        let mut stream = request.into_inner();
        let mut received: u64 = 0;

        loop {
            let plate = match stream.message().await {
                Ok(Some(plate)) => plate,
                Ok(None) => break,
                Err(status) => {
                    warn!(
                        remote = ?remote,
                        received,
                        error = %status,
                        "Plate stream aborted"
                    );
                    return Err(status);
                }
            };

            self.queue.push(Record::from(plate));
            received += 1;
            self.records_received.fetch_add(1, Ordering::Relaxed);
            metrics::try_record_received(1);
        }

        let message = acknowledgment(received);
        info!(
            remote = ?remote,
            received,
            sink = self.sink.name(),
            queue_depth = self.queue.depth(),
            "{message}"
        );

        Ok(Response::new(PlateResponse { message }))
    }

    async fn health(
        &self,
        _request: Request<HealthRequest>,
    ) -> Result<Response<HealthResponse>, Status> {
        Ok(Response::new(HealthResponse {
            healthy: self.sink.health().await,
            sink: self.sink.name().to_string(),
            queue_depth: self.queue.depth(),
            records_received: self.records_received(),
            uptime_seconds: self.start_time.elapsed().as_secs() as i64,
        }))
    }
}
