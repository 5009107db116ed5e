//! Client for uploading plates to a gateway
//!
//! Connection establishment and the upload call have separate time limits: the
//! connect timeout bounds dialing, the deadline bounds one `SendPlates` call.
//!
//! # Example
//!
//! ```ignore
//! let mut client = IngestClient::connect("http://localhost:50051", Duration::from_secs(5)).await?;
//! let ack = client.send_plates(records, Duration::from_secs(60)).await?;
//! ```

use crate::error::{PlatesError, Result};
use crate::proto::PlateRequest;
use crate::proto::plates_client::PlatesClient;
use crate::record::Record;
use futures::Stream;
use std::env;
use std::time::Duration;
use tonic::Request;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
const KEEPALIVE_TIMEOUT: Duration = Duration::from_millis(100);

/// Client configuration for the `plates-client` binary
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Gateway endpoint URL
    pub server: String,
    /// Plates data file to upload
    pub datafile: String,
    pub connect_timeout: Duration,
    pub deadline: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "http://localhost:50051".to_string(),
            datafile: "testdata/od-data.csv".to_string(),
            connect_timeout: Duration::from_secs(5),
            deadline: Duration::from_secs(60),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok().filter(|v| !v.is_empty()))
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ClientConfig::default();

        if let Some(server) = lookup("GRPC_SERVER") {
            config.server = with_scheme(&server);
        }
        if let Some(file) = lookup("DATAFILE") {
            config.datafile = file;
        }
        if let Some(secs) = lookup("PLATES_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(secs.parse().map_err(|e| {
                PlatesError::Config(format!("invalid PLATES_CONNECT_TIMEOUT_SECS: {e}"))
            })?);
        }
        if let Some(secs) = lookup("PLATES_DEADLINE_SECS") {
            config.deadline = Duration::from_secs(
                secs.parse()
                    .map_err(|e| PlatesError::Config(format!("invalid PLATES_DEADLINE_SECS: {e}")))?,
            );
        }

        Ok(config)
    }
}

/// `host:port` becomes `http://host:port`
fn with_scheme(server: &str) -> String {
    if server.contains("://") {
        server.to_string()
    } else {
        format!("http://{server}")
    }
}

/// Connected plates uploader
pub struct IngestClient {
    client: PlatesClient<Channel>,
    endpoint: String,
}

impl IngestClient {
    /// Connect to a gateway, giving up after `connect_timeout`
    pub async fn connect(endpoint: impl Into<String>, connect_timeout: Duration) -> Result<Self> {
        let endpoint = with_scheme(&endpoint.into());

        let channel = Endpoint::from_shared(endpoint.clone())
            .map_err(|e| PlatesError::Config(format!("invalid endpoint URL {endpoint}: {e}")))?
            .connect_timeout(connect_timeout)
            .http2_keep_alive_interval(KEEPALIVE_INTERVAL)
            .keep_alive_timeout(KEEPALIVE_TIMEOUT)
            .keep_alive_while_idle(true);

        let channel = tokio::time::timeout(connect_timeout, channel.connect())
            .await
            .map_err(|_| PlatesError::ConnectTimeout {
                endpoint: endpoint.clone(),
                timeout: connect_timeout,
            })??;

        debug!(endpoint = %endpoint, "Connected to gateway");

        Ok(Self {
            client: PlatesClient::new(channel),
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Upload records in one call and return the acknowledgment message
    pub async fn send_plates(&mut self, records: Vec<Record>, deadline: Duration) -> Result<String> {
        info!(count = records.len(), endpoint = %self.endpoint, "Sending plates");
        let plates = futures::stream::iter(records.into_iter().map(PlateRequest::from));
        self.send_stream(plates, deadline).await
    }

    /// Upload an arbitrary stream of plates in one call
    ///
    /// The call fails without an acknowledgment if `deadline` passes before the
    /// stream ends and the server answers.
    pub async fn send_stream<S>(&mut self, plates: S, deadline: Duration) -> Result<String>
    where
        S: Stream<Item = PlateRequest> + Send + 'static,
    {
        let mut request = Request::new(plates);
        request.set_timeout(deadline);

        let response = tokio::time::timeout(deadline, self.client.send_plates(request))
            .await
            .map_err(|_| PlatesError::DeadlineExceeded(deadline))??;

        Ok(response.into_inner().message)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_with_scheme() {
        assert_eq!(with_scheme("localhost:50051"), "http://localhost:50051");
        assert_eq!(with_scheme("https://gw:443"), "https://gw:443");
    }

    #[test]
    fn test_client_config_overrides() {
        let vars: HashMap<&str, &str> = [
            ("GRPC_SERVER", "gw.lab:50051"),
            ("PLATES_DEADLINE_SECS", "2"),
        ]
        .into_iter()
        .collect();

        let config = ClientConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.server, "http://gw.lab:50051");
        assert_eq!(config.deadline, Duration::from_secs(2));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.datafile, "testdata/od-data.csv");
    }

    #[test]
    fn test_client_config_rejects_bad_deadline() {
        let err = ClientConfig::from_lookup(|k| {
            (k == "PLATES_DEADLINE_SECS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, PlatesError::Config(_)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let result = IngestClient::connect("127.0.0.1:1", Duration::from_millis(300)).await;
        assert!(result.is_err());
    }
}
