//! Database session abstraction.
//!
//! Every loader component talks to PostgreSQL through [`Session`]. The trait
//! covers the four things the loader needs: plain SQL with scalar results,
//! one-transaction batches, catalog introspection and raw `COPY` in both
//! directions. [`PgSession`] is the production implementation on top of a
//! pooled `tokio-postgres` client.

mod postgres;
pub mod tls;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

pub use postgres::{PgPool, PgSession};
pub use tls::SslMode;

/// Reader fed into `COPY ... FROM STDIN`.
pub type CopyReader<'a> = &'a mut (dyn AsyncRead + Unpin + Send);

/// Writer receiving `COPY ... TO STDOUT`.
pub type CopyWriter<'a> = &'a mut (dyn AsyncWrite + Unpin + Send);

/// A single connection to the target database.
///
/// Implementations must leave the connection usable after any error,
/// including a failed `COPY`.
#[async_trait]
pub trait Session: Send + Sync {
    /// Run one or more statements with the simple query protocol.
    ///
    /// Suitable for statements that cannot run inside a transaction block,
    /// such as `VACUUM`.
    async fn execute(&self, sql: &str) -> Result<()>;

    /// Run a query returning at most one `bigint` value.
    ///
    /// Returns `None` when the query yields no row or a NULL.
    async fn query_i64(&self, sql: &str) -> Result<Option<i64>>;

    /// Run `statements` in order inside one transaction.
    ///
    /// Commits only when every statement succeeds. On the first failure the
    /// transaction is rolled back and `LoadError::Transaction` names the
    /// failing statement.
    async fn execute_atomic(&mut self, statements: &[String]) -> Result<()>;

    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool>;

    async fn sequence_exists(&self, schema: &str, sequence: &str) -> Result<bool>;

    /// Column names of a table in ordinal order. Empty when the table is missing.
    async fn table_columns(&self, schema: &str, table: &str) -> Result<Vec<String>>;

    /// Tables in `schema` whose name starts with `prefix`, sorted by name.
    async fn list_tables(&self, schema: &str, prefix: &str) -> Result<Vec<String>>;

    /// Stream `reader` into a `COPY ... FROM STDIN` statement in chunks of
    /// about `chunk_bytes`. Returns the row count reported by the server.
    async fn copy_in(
        &self,
        statement: &str,
        reader: CopyReader<'_>,
        chunk_bytes: usize,
    ) -> Result<u64>;

    /// Drain a `COPY ... TO STDOUT` statement into `writer`. Returns the
    /// number of bytes written.
    async fn copy_out(&self, statement: &str, writer: CopyWriter<'_>) -> Result<u64>;
}
