//! PostgreSQL sink
//!
//! Provisioning opens the connection pool and makes sure the target table exists.
//! It runs at most once per sink; concurrent callers wait for the first attempt and
//! a failed attempt can be retried. Writes before provisioning fail with
//! [`SinkError::NotReady`].
//!
//! The table has no primary key and no indexes, every column is nullable. Rows are
//! appended as fast as the store accepts them and nothing here supports reads.

use crate::config::DbConfig;
use crate::error::SinkError;
use crate::record::Record;
use crate::sink::Sink;
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Pool ceiling for open connections
pub const MAX_OPEN_CONNECTIONS: u32 = 25;

/// Connections are recycled after this long
pub const MAX_CONNECTION_LIFETIME: Duration = Duration::from_secs(5 * 60);

/// Relational sink - inserts one row per plate
pub struct RelationalSink {
    config: DbConfig,
    pool: OnceCell<PgPool>,
    insert_sql: String,
    /// Completed provisioning runs (at most one)
    provisioned: AtomicU64,
    /// Count of plates written
    written_count: AtomicU64,
}

impl RelationalSink {
    /// Create an unprovisioned sink; nothing is connected yet
    pub fn new(config: DbConfig) -> Self {
        let insert_sql = insert_statement(&config.table);
        Self {
            config,
            pool: OnceCell::new(),
            insert_sql,
            provisioned: AtomicU64::new(0),
            written_count: AtomicU64::new(0),
        }
    }

    pub fn table(&self) -> &str {
        &self.config.table
    }

    pub fn is_ready(&self) -> bool {
        self.pool.initialized()
    }

    /// Number of times provisioning actually ran to completion
    pub fn provision_count(&self) -> u64 {
        self.provisioned.load(Ordering::SeqCst)
    }

    /// Get total plates written
    pub fn written_count(&self) -> u64 {
        self.written_count.load(Ordering::Relaxed)
    }

    /// The pool, once provisioned
    pub fn pool(&self) -> Option<&PgPool> {
        self.pool.get()
    }

    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .username(&self.config.username)
            .password(&self.config.password)
            .database(&self.config.name)
    }

    async fn open_pool(&self) -> Result<PgPool, SinkError> {
        info!(
            host = %self.config.host,
            port = self.config.port,
            database = %self.config.name,
            table = %self.config.table,
            "Connecting to relational store"
        );

        // Idle connections are kept up to the open-connection ceiling.
        let pool = PgPoolOptions::new()
            .max_connections(MAX_OPEN_CONNECTIONS)
            .idle_timeout(None)
            .max_lifetime(MAX_CONNECTION_LIFETIME)
            .acquire_timeout(self.config.connect_timeout)
            .connect_with(self.connect_options())
            .await
            .map_err(|e| SinkError::Provision(format!("failed to open pool: {e}")))?;

        ensure_table(&pool, &self.config.table).await?;
        Ok(pool)
    }

    /// Run `open` unless a pool is already in place
    async fn provision_with<F, Fut>(&self, open: F) -> Result<(), SinkError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PgPool, SinkError>>,
    {
        self.pool
            .get_or_try_init(|| async {
                let pool = open().await?;
                self.provisioned.fetch_add(1, Ordering::SeqCst);
                Ok::<_, SinkError>(pool)
            })
            .await?;
        Ok(())
    }
}

/// Create the plates table unless it already exists in the current schema
async fn ensure_table(pool: &PgPool, table: &str) -> Result<(), SinkError> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = $1)",
    )
    .bind(table)
    .fetch_one(pool)
    .await
    .map_err(|e| SinkError::Provision(format!("failed to inspect schema: {e}")))?;

    if exists {
        info!(table = %table, "Table exists");
        return Ok(());
    }

    sqlx::query(&create_statement(table))
        .execute(pool)
        .await
        .map_err(|e| SinkError::Provision(format!("failed to create table {table}: {e}")))?;

    info!(table = %table, "Table created");
    Ok(())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn create_statement(table: &str) -> String {
    format!(
        "CREATE TABLE {} (\
            plate integer NULL, \
            well text NULL, \
            runtime integer NULL, \
            optical_density real NULL, \
            run text NULL, \
            corrected_optical_density real NULL\
        )",
        quote_ident(table)
    )
}

fn insert_statement(table: &str) -> String {
    format!(
        "INSERT INTO {} (plate, well, runtime, optical_density, run, corrected_optical_density) \
         VALUES ($1, $2, $3, $4, $5, $6)",
        quote_ident(table)
    )
}

#[async_trait]
impl Sink for RelationalSink {
    fn name(&self) -> &'static str {
        "db"
    }

    async fn provision(&self) -> Result<(), SinkError> {
        self.provision_with(|| self.open_pool()).await
    }

    async fn write(&self, record: &Record) -> Result<(), SinkError> {
        let pool = self.pool.get().ok_or(SinkError::NotReady)?;

        sqlx::query(&self.insert_sql)
            .bind(record.plate)
            .bind(&record.well)
            .bind(record.runtime)
            .bind(record.optical_density)
            .bind(&record.run)
            .bind(record.corrected_optical_density)
            .execute(pool)
            .await?;

        self.written_count.fetch_add(1, Ordering::Relaxed);
        debug!(table = %self.config.table, "Plate inserted");
        Ok(())
    }

    async fn health(&self) -> bool {
        self.pool.get().is_some_and(|pool| !pool.is_closed())
    }

    async fn shutdown(&self) -> Result<(), SinkError> {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
            info!(table = %self.config.table, "Relational sink closed");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn unreachable_config() -> DbConfig {
        DbConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            connect_timeout: Duration::from_millis(200),
            ..DbConfig::default()
        }
    }

    #[tokio::test]
    async fn test_write_before_provision_is_not_ready() {
        let sink = RelationalSink::new(DbConfig::default());
        let record = Record::new(1, "A1", 10, 0.5, "R1", 0.45);

        let err = sink.write(&record).await.unwrap_err();
        assert!(matches!(err, SinkError::NotReady));
        assert!(!sink.is_ready());
        assert!(!sink.health().await);
    }

    #[tokio::test]
    async fn test_failed_provision_leaves_sink_unready() {
        let sink = RelationalSink::new(unreachable_config());

        let err = sink.provision().await.unwrap_err();
        assert!(matches!(err, SinkError::Provision(_)));
        assert!(!sink.is_ready());
        assert_eq!(sink.provision_count(), 0);

        let record = Record::new(1, "A1", 10, 0.5, "R1", 0.45);
        assert!(matches!(
            sink.write(&record).await.unwrap_err(),
            SinkError::NotReady
        ));
    }

    // A lazy pool stands in for a provisioned one without touching the network.
    fn lazy_pool() -> PgPool {
        PgPoolOptions::new().connect_lazy_with(PgConnectOptions::new())
    }

    #[tokio::test]
    async fn test_concurrent_provisioning_runs_once() {
        let sink = RelationalSink::new(DbConfig::default());
        let opens = AtomicU64::new(0);
        let open = || async {
            opens.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(lazy_pool())
        };

        let (a, b) = tokio::join!(sink.provision_with(open), sink.provision_with(open));
        a.unwrap();
        b.unwrap();
        sink.provision_with(open).await.unwrap();

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(sink.provision_count(), 1);
        assert!(sink.is_ready());
        assert!(sink.health().await);
    }

    #[tokio::test]
    async fn test_provisioning_retries_after_failure() {
        let sink = RelationalSink::new(DbConfig::default());

        let err = sink
            .provision_with(|| async { Err(SinkError::Provision("refused".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Provision(_)));
        assert_eq!(sink.provision_count(), 0);

        sink.provision_with(|| async { Ok(lazy_pool()) })
            .await
            .unwrap();
        assert_eq!(sink.provision_count(), 1);
        assert!(sink.is_ready());
    }

    #[tokio::test]
    async fn test_shutdown_makes_sink_unhealthy() {
        let sink = RelationalSink::new(DbConfig::default());
        sink.provision_with(|| async { Ok(lazy_pool()) })
            .await
            .unwrap();
        assert!(sink.health().await);

        sink.shutdown().await.unwrap();
        assert!(!sink.health().await);
    }

    #[test]
    fn test_statements_use_configured_table() {
        let insert = insert_statement("od_readings");
        assert!(insert.starts_with("INSERT INTO \"od_readings\""));
        assert!(insert.contains("$6"));

        let create = create_statement("od_readings");
        assert!(create.starts_with("CREATE TABLE \"od_readings\""));
        for column in [
            "plate integer NULL",
            "well text NULL",
            "runtime integer NULL",
            "optical_density real NULL",
            "run text NULL",
            "corrected_optical_density real NULL",
        ] {
            assert!(create.contains(column), "missing {column}");
        }
        assert!(!create.contains("PRIMARY KEY"));
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("plates"), "\"plates\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
