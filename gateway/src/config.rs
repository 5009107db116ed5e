//! Configuration for the plates gateway
//!
//! Every setting has a default that is overridden by its environment variable.
//! Empty variables are treated as unset.

use crate::error::{PlatesError, Result};
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration for the gateway server
#[derive(Debug, Clone)]
pub struct Config {
    /// gRPC server address
    pub grpc_addr: SocketAddr,

    /// Metrics server address
    pub metrics_addr: SocketAddr,

    /// Where received plates are persisted
    pub output: SinkKind,

    /// Relational store parameters (used when `output` is `db`)
    pub db: DbConfig,

    /// How long the worker waits on an empty queue before closing a cycle
    pub cycle_idle: Duration,

    /// Log format (json or pretty)
    pub log_format: LogFormat,
}

/// Sink selected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// Log every plate
    Stdout,
    /// Insert every plate into a PostgreSQL table
    Db,
}

impl FromStr for SinkKind {
    type Err = PlatesError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "stdout" => Ok(SinkKind::Stdout),
            "db" => Ok(SinkKind::Db),
            other => Err(PlatesError::Config(format!(
                "invalid OUTPUT: {other} (expected 'stdout' or 'db')"
            ))),
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::Stdout => write!(f, "stdout"),
            SinkKind::Db => write!(f, "db"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// PostgreSQL connection parameters
#[derive(Clone)]
pub struct DbConfig {
    pub host: String,
    pub name: String,
    pub username: String,
    pub password: String,
    pub port: u16,
    pub table: String,
    /// Upper bound on establishing a pooled connection
    pub connect_timeout: Duration,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("name", &self.name)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .field("table", &self.table)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            name: "postgres".to_string(),
            username: "postgres".to_string(),
            password: "postgres".to_string(),
            port: 5432,
            table: "plates".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl DbConfig {
    /// Load the relational parameters alone from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut db = DbConfig::default();

        if let Some(host) = lookup("DB_HOST") {
            db.host = host;
        }
        if let Some(name) = lookup("DB_NAME") {
            db.name = name;
        }
        if let Some(username) = lookup("DB_USERNAME") {
            db.username = username;
        }
        if let Some(password) = lookup("DB_PASSWORD") {
            db.password = password;
        }
        if let Some(port) = lookup("DB_PORT") {
            db.port = port
                .parse()
                .map_err(|e| PlatesError::Config(format!("invalid DB_PORT: {e}")))?;
        }
        if let Some(table) = lookup("DB_TABLE") {
            db.table = table;
        }
        if let Some(secs) = lookup("PLATES_DB_CONNECT_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|e| {
                PlatesError::Config(format!("invalid PLATES_DB_CONNECT_TIMEOUT_SECS: {e}"))
            })?;
            db.connect_timeout = Duration::from_secs(secs);
        }

        if db.table.trim().is_empty() {
            return Err(PlatesError::Config("DB_TABLE must not be blank".to_string()));
        }

        Ok(db)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grpc_addr: SocketAddr::from(([0, 0, 0, 0], 50051)),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            output: SinkKind::Stdout,
            db: DbConfig::default(),
            cycle_idle: Duration::from_millis(50),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(addr) = lookup("PLATES_GRPC_ADDR") {
            config.grpc_addr = addr
                .parse()
                .map_err(|e| PlatesError::Config(format!("invalid PLATES_GRPC_ADDR: {e}")))?;
        }

        if let Some(addr) = lookup("PLATES_METRICS_ADDR") {
            config.metrics_addr = addr
                .parse()
                .map_err(|e| PlatesError::Config(format!("invalid PLATES_METRICS_ADDR: {e}")))?;
        }

        if let Some(output) = lookup("OUTPUT") {
            config.output = output.parse()?;
        }

        config.db = DbConfig::from_lookup(&lookup)?;

        if let Some(ms) = lookup("PLATES_CYCLE_IDLE_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|e| PlatesError::Config(format!("invalid PLATES_CYCLE_IDLE_MS: {e}")))?;
            config.cycle_idle = Duration::from_millis(ms);
        }

        if let Some(format) = lookup("PLATES_LOG_FORMAT") {
            config.log_format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(PlatesError::Config(format!(
                        "invalid PLATES_LOG_FORMAT: {other} (expected 'json' or 'pretty')"
                    )));
                }
            };
        }

        Ok(config)
    }
}

fn env_lookup(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.grpc_addr.port(), 50051);
        assert_eq!(config.output, SinkKind::Stdout);
        assert_eq!(config.db.port, 5432);
        assert_eq!(config.db.table, "plates");
        assert_eq!(config.cycle_idle, Duration::from_millis(50));
    }

    #[test]
    fn test_db_params_override_independently() {
        let config = Config::from_lookup(lookup_from(&[
            ("OUTPUT", "db"),
            ("DB_HOST", "pg.internal"),
            ("DB_TABLE", "od_readings"),
        ]))
        .unwrap();

        assert_eq!(config.output, SinkKind::Db);
        assert_eq!(config.db.host, "pg.internal");
        assert_eq!(config.db.table, "od_readings");
        // untouched params keep their defaults
        assert_eq!(config.db.username, "postgres");
        assert_eq!(config.db.password, "postgres");
        assert_eq!(config.db.port, 5432);
    }

    #[test]
    fn test_unknown_output_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("OUTPUT", "kafka")])).unwrap_err();
        assert!(matches!(err, PlatesError::Config(_)));
    }

    #[test]
    fn test_output_is_case_insensitive() {
        assert_eq!("STDOUT".parse::<SinkKind>().unwrap(), SinkKind::Stdout);
        assert_eq!(" db ".parse::<SinkKind>().unwrap(), SinkKind::Db);
    }

    #[test]
    fn test_invalid_port() {
        let err = Config::from_lookup(lookup_from(&[("DB_PORT", "not-a-port")])).unwrap_err();
        assert!(err.to_string().contains("DB_PORT"));
    }

    #[test]
    fn test_cycle_idle_override() {
        let config = Config::from_lookup(lookup_from(&[("PLATES_CYCLE_IDLE_MS", "5")])).unwrap();
        assert_eq!(config.cycle_idle, Duration::from_millis(5));
    }

    #[test]
    fn test_password_is_redacted() {
        let rendered = format!("{:?}", DbConfig::default());
        assert!(!rendered.contains("password: \"postgres\""));
        assert!(rendered.contains("<redacted>"));
    }
}
