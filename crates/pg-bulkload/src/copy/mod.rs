//! Streaming COPY channel.
//!
//! Moves CSV data between PostgreSQL and byte streams with the COPY protocol.
//! Data is streamed in bounded chunks in both directions, so memory use does
//! not grow with the size of the table. The CSV dialect is fixed: header row,
//! comma delimiter, standard double-quote quoting.

mod csv;

use std::path::Path;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info};

use crate::core::identifier::quote_column_list;
use crate::core::table::ResolvedTable;
use crate::error::{LoadError, Result};
use crate::session::Session;

pub use csv::CsvRecordCounter;

/// Options appended to every COPY statement.
pub const CSV_OPTIONS: &str = "WITH (FORMAT csv, HEADER true, DELIMITER ',')";

/// Default chunk size for feeding COPY FROM STDIN.
pub const DEFAULT_CHUNK_BYTES: usize = 64 * 1024;

/// Where exported rows come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopySource {
    /// A whole table, optionally restricted to some columns.
    Table(ResolvedTable),
    /// Arbitrary caller-supplied SQL.
    Query(String),
}

impl CopySource {
    fn label(&self) -> String {
        match self {
            CopySource::Table(t) => t.to_string(),
            CopySource::Query(_) => "query".to_string(),
        }
    }
}

/// Check that `table` exists and has every column in `columns`.
pub(crate) async fn check_table(
    session: &dyn Session,
    table: &ResolvedTable,
    columns: Option<&[String]>,
) -> Result<Vec<String>> {
    if !session.table_exists(&table.schema, &table.table).await? {
        return Err(LoadError::precondition(format!(
            "table {} does not exist",
            table
        )));
    }
    let existing = session.table_columns(&table.schema, &table.table).await?;
    if let Some(columns) = columns {
        if columns.is_empty() {
            return Err(LoadError::precondition(format!(
                "empty column list for {}",
                table
            )));
        }
        let missing: Vec<&str> = columns
            .iter()
            .filter(|c| !existing.contains(c))
            .map(|c| c.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(LoadError::precondition(format!(
                "column(s) {} not found in {}",
                missing.join(", "),
                table
            )));
        }
    }
    Ok(existing)
}

fn column_clause(columns: Option<&[String]>) -> Result<String> {
    match columns {
        Some(cols) => Ok(format!(" ({})", quote_column_list(cols)?)),
        None => Ok(String::new()),
    }
}

/// Strip trailing semicolons and whitespace from a caller query.
fn normalize_query(query: &str) -> Result<&str> {
    let trimmed = query.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if trimmed.is_empty() {
        return Err(LoadError::precondition("export query is empty"));
    }
    Ok(trimmed)
}

/// Build the `COPY ... TO STDOUT` statement for a source.
pub fn export_statement(source: &CopySource, columns: Option<&[String]>) -> Result<String> {
    match source {
        CopySource::Table(table) => Ok(format!(
            "COPY {}{} TO STDOUT {}",
            table.qualified()?,
            column_clause(columns)?,
            CSV_OPTIONS
        )),
        CopySource::Query(query) => Ok(format!(
            "COPY ({}) TO STDOUT {}",
            normalize_query(query)?,
            CSV_OPTIONS
        )),
    }
}

/// Build the `COPY ... FROM STDIN` statement for a destination.
pub fn import_statement(destination: &ResolvedTable, columns: Option<&[String]>) -> Result<String> {
    import_statement_for(&destination.qualified()?, columns)
}

pub(crate) fn import_statement_for(relation: &str, columns: Option<&[String]>) -> Result<String> {
    Ok(format!(
        "COPY {}{} FROM STDIN {}",
        relation,
        column_clause(columns)?,
        CSV_OPTIONS
    ))
}

fn relabel(e: LoadError, target: &str) -> LoadError {
    match e {
        LoadError::Copy { message, .. } => LoadError::copy(target, message),
        other => other,
    }
}

/// Export rows as CSV into `sink`. Returns the number of data rows written.
pub async fn export_rows<W>(
    session: &dyn Session,
    source: &CopySource,
    sink: &mut W,
    columns: Option<&[String]>,
) -> Result<u64>
where
    W: AsyncWrite + Unpin + Send,
{
    let columns = match source {
        CopySource::Table(table) => {
            check_table(session, table, columns).await?;
            columns
        }
        // columns only restrict table sources
        CopySource::Query(_) => None,
    };
    let statement = export_statement(source, columns)?;
    let label = source.label();

    let mut counter = CsvRecordCounter::new(BufWriter::with_capacity(DEFAULT_CHUNK_BYTES, sink));
    let bytes = session
        .copy_out(&statement, &mut counter)
        .await
        .map_err(|e| relabel(e, &label))?;
    counter.flush().await?;

    let rows = counter.records();
    debug!("exported {} rows ({} bytes) from {}", rows, bytes, label);
    Ok(rows)
}

/// Import CSV from `source` into `destination`. Returns the server's row count.
///
/// A malformed row fails the whole COPY; nothing from it is kept.
pub async fn import_rows<R>(
    session: &dyn Session,
    destination: &ResolvedTable,
    source: &mut R,
    columns: Option<&[String]>,
    chunk_bytes: usize,
) -> Result<u64>
where
    R: AsyncRead + Unpin + Send,
{
    check_table(session, destination, columns).await?;
    copy_into(
        session,
        &destination.qualified()?,
        &destination.to_string(),
        source,
        columns,
        chunk_bytes,
    )
    .await
}

/// Feed `source` into an already validated, quoted relation.
pub(crate) async fn copy_into<R>(
    session: &dyn Session,
    relation: &str,
    label: &str,
    source: &mut R,
    columns: Option<&[String]>,
    chunk_bytes: usize,
) -> Result<u64>
where
    R: AsyncRead + Unpin + Send,
{
    let statement = import_statement_for(relation, columns)?;
    let rows = session
        .copy_in(&statement, source, chunk_bytes)
        .await
        .map_err(|e| relabel(e, label))?;
    debug!("imported {} rows into {}", rows, label);
    Ok(rows)
}

/// Export a source to a CSV file, replacing the file if it exists.
pub async fn export_to_file(
    session: &dyn Session,
    source: &CopySource,
    path: &Path,
    columns: Option<&[String]>,
) -> Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let rows = export_rows(session, source, &mut file, columns).await?;
    file.sync_all().await?;
    info!(
        "exported {} rows from {} to {}",
        rows,
        source.label(),
        path.display()
    );
    Ok(rows)
}

/// Import a CSV file into a table.
pub async fn import_from_file(
    session: &dyn Session,
    destination: &ResolvedTable,
    path: &Path,
    columns: Option<&[String]>,
    chunk_bytes: usize,
) -> Result<u64> {
    check_table(session, destination, columns).await?;
    let mut file = tokio::fs::File::open(path).await?;
    let rows = copy_into(
        session,
        &destination.qualified()?,
        &destination.to_string(),
        &mut file,
        columns,
        chunk_bytes,
    )
    .await?;
    info!(
        "imported {} rows from {} into {}",
        rows,
        path.display(),
        destination
    );
    Ok(rows)
}
