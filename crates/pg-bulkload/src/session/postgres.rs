//! PostgreSQL session over a deadpool-managed `tokio-postgres` client.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_postgres::Config as PgConfig;
use tracing::{debug, error, info, warn};

use super::tls::{self, SslMode};
use super::{CopyReader, CopyWriter, Session};
use crate::config::DatabaseConfig;
use crate::error::{LoadError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection pool for the target database.
#[derive(Clone)]
pub struct PgPool {
    pool: Pool,
    label: String,
}

impl PgPool {
    /// Build a pool from configuration and test one connection.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("pg-bulkload");

        let label = format!("{}:{}/{}", config.host, config.port, config.database);
        let ssl_mode = SslMode::parse(&config.ssl_mode)?;
        Self::from_pg_config(pg_config, ssl_mode, config.max_connections, label).await
    }

    /// Build a pool from a libpq-style connection string or URL.
    pub async fn from_url(url: &str, ssl_mode: SslMode, max_connections: usize) -> Result<Self> {
        let pg_config: PgConfig = url
            .parse()
            .map_err(|e| LoadError::Config(format!("invalid connection string: {}", e)))?;
        let label = pg_config
            .get_dbname()
            .unwrap_or("postgres")
            .to_string();
        Self::from_pg_config(pg_config, ssl_mode, max_connections, label).await
    }

    async fn from_pg_config(
        mut pg_config: PgConfig,
        ssl_mode: SslMode,
        max_connections: usize,
        label: String,
    ) -> Result<Self> {
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let pool = match tls::make_connector(ssl_mode)? {
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_connections)
                    .build()
                    .map_err(|e| LoadError::pool(e, "creating PostgreSQL pool"))?
            }
            Some(tls_connector) => {
                let mgr = Manager::from_config(pg_config, tls_connector, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_connections)
                    .build()
                    .map_err(|e| LoadError::pool(e, "creating PostgreSQL pool"))?
            }
        };

        let pool = Self { pool, label };
        let session = pool.session().await?;
        session.execute("SELECT 1").await?;
        info!("Connected to PostgreSQL: {}", pool.label);

        Ok(pool)
    }

    /// Check out a session.
    pub async fn session(&self) -> Result<PgSession> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| LoadError::pool(e, format!("getting connection to {}", self.label)))?;
        Ok(PgSession { client })
    }

    /// Server version string, used by the health check.
    pub async fn server_version(&self) -> Result<String> {
        let session = self.session().await?;
        let row = session.client.query_one("SELECT version()", &[]).await?;
        Ok(row.get::<_, String>(0))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn close(&self) {
        self.pool.close();
    }
}

/// One pooled connection. Returned to the pool on drop.
pub struct PgSession {
    client: Object,
}

/// Server message for database errors, the plain display otherwise.
fn describe(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => match db.detail() {
            Some(detail) => format!("{} ({})", db.message(), detail),
            None => db.message().to_string(),
        },
        None => e.to_string(),
    }
}

#[async_trait]
impl Session for PgSession {
    async fn execute(&self, sql: &str) -> Result<()> {
        debug!("executing: {}", sql);
        self.client.batch_execute(sql).await?;
        Ok(())
    }

    async fn query_i64(&self, sql: &str) -> Result<Option<i64>> {
        debug!("querying: {}", sql);
        let row = self.client.query_opt(sql, &[]).await?;
        match row {
            Some(row) => Ok(row.try_get::<_, Option<i64>>(0)?),
            None => Ok(None),
        }
    }

    async fn execute_atomic(&mut self, statements: &[String]) -> Result<()> {
        let tx = self.client.transaction().await?;

        for statement in statements {
            debug!("in transaction: {}", statement);
            if let Err(e) = tx.batch_execute(statement).await {
                let message = describe(&e);
                if let Err(rollback_err) = tx.rollback().await {
                    error!("rollback failed after `{}`: {}", statement, rollback_err);
                }
                return Err(LoadError::transaction(statement.clone(), message));
            }
        }

        tx.commit()
            .await
            .map_err(|e| LoadError::transaction("COMMIT", describe(&e)))
    }

    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_name = $2)",
                &[&schema, &table],
            )
            .await?;
        Ok(row.get::<_, bool>(0))
    }

    async fn sequence_exists(&self, schema: &str, sequence: &str) -> Result<bool> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.sequences \
                 WHERE sequence_schema = $1 AND sequence_name = $2)",
                &[&schema, &sequence],
            )
            .await?;
        Ok(row.get::<_, bool>(0))
    }

    async fn table_columns(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT column_name::text FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2 \
                 ORDER BY ordinal_position",
                &[&schema, &table],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn list_tables(&self, schema: &str, prefix: &str) -> Result<Vec<String>> {
        // left() instead of LIKE so '_' in the prefix is not a wildcard
        let rows = self
            .client
            .query(
                "SELECT table_name::text FROM information_schema.tables \
                 WHERE table_schema = $1 \
                 AND left(table_name::text, length($2::text)) = $2::text \
                 ORDER BY table_name",
                &[&schema, &prefix],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn copy_in(
        &self,
        statement: &str,
        reader: CopyReader<'_>,
        chunk_bytes: usize,
    ) -> Result<u64> {
        debug!("copy in: {}", statement);
        let sink = self
            .client
            .copy_in::<_, Bytes>(statement)
            .await
            .map_err(|e| LoadError::copy(statement, describe(&e)))?;
        tokio::pin!(sink);

        let chunk_bytes = chunk_bytes.max(1);
        let mut buf = BytesMut::with_capacity(chunk_bytes);
        loop {
            buf.reserve(chunk_bytes);
            // An early return drops the unfinished sink, which aborts the COPY
            let n = reader.read_buf(&mut buf).await?;
            if n == 0 {
                break;
            }
            if buf.len() >= chunk_bytes {
                sink.send(buf.split().freeze())
                    .await
                    .map_err(|e| LoadError::copy(statement, describe(&e)))?;
            }
        }
        if !buf.is_empty() {
            sink.send(buf.split().freeze())
                .await
                .map_err(|e| LoadError::copy(statement, describe(&e)))?;
        }

        sink.finish()
            .await
            .map_err(|e| LoadError::copy(statement, describe(&e)))
    }

    async fn copy_out(&self, statement: &str, writer: CopyWriter<'_>) -> Result<u64> {
        debug!("copy out: {}", statement);
        let stream = self
            .client
            .copy_out(statement)
            .await
            .map_err(|e| LoadError::copy(statement, describe(&e)))?;
        tokio::pin!(stream);

        let mut written = 0u64;
        let mut write_error: Option<std::io::Error> = None;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LoadError::copy(statement, describe(&e)))?;
            if write_error.is_some() {
                // keep draining so the connection returns to idle
                continue;
            }
            match writer.write_all(&chunk).await {
                Ok(()) => written += chunk.len() as u64,
                Err(e) => {
                    warn!("write failed during COPY OUT, draining remaining data: {}", e);
                    write_error = Some(e);
                }
            }
        }

        if let Some(e) = write_error {
            return Err(e.into());
        }
        writer.flush().await?;
        Ok(written)
    }
}
