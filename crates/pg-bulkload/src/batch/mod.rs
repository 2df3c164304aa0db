//! Multi-row INSERT batches for small loads.
//!
//! For data already in memory, a handful of literal `INSERT ... VALUES`
//! statements is simpler than a staging round trip. Rows are split into
//! batches of `batch_size` and each batch becomes one statement.

use tracing::{debug, info};

use crate::copy::check_table;
use crate::core::identifier::quote_column_list;
use crate::core::table::ResolvedTable;
use crate::core::value::SqlValue;
use crate::error::{LoadError, Result};
use crate::session::Session;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Column list for an insert, dropping the primary key unless asked to keep it.
///
/// Leaving the key out lets the sequence assign it.
pub fn insert_columns(all: &[String], primary_key: &str, include_primary_key: bool) -> Vec<String> {
    all.iter()
        .filter(|c| include_primary_key || c.as_str() != primary_key)
        .cloned()
        .collect()
}

/// Encode rows as `INSERT INTO t (cols) VALUES (...), (...)` statements.
pub fn encode(
    table: &ResolvedTable,
    columns: &[String],
    rows: &[Vec<SqlValue<'_>>],
    batch_size: usize,
) -> Result<Vec<String>> {
    if batch_size == 0 {
        return Err(LoadError::Config("batch_size must be at least 1".into()));
    }
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    if columns.is_empty() {
        return Err(LoadError::precondition(format!(
            "no columns given for insert into {}",
            table
        )));
    }
    if let Some((i, row)) = rows
        .iter()
        .enumerate()
        .find(|(_, row)| row.len() != columns.len())
    {
        return Err(LoadError::precondition(format!(
            "row {} has {} values but {} columns were given",
            i,
            row.len(),
            columns.len()
        )));
    }

    let head = format!(
        "INSERT INTO {} ({}) VALUES ",
        table.qualified()?,
        quote_column_list(columns)?
    );

    let statements = rows
        .chunks(batch_size)
        .map(|batch| {
            let values: Vec<String> = batch
                .iter()
                .map(|row| {
                    let literals: Vec<String> = row.iter().map(SqlValue::to_literal).collect();
                    format!("({})", literals.join(", "))
                })
                .collect();
            format!("{}{}", head, values.join(", "))
        })
        .collect();

    Ok(statements)
}

/// Insert rows in batches, all inside one transaction.
///
/// Columns are checked against the catalog first. Returns the number of rows
/// inserted; a failure in any batch inserts nothing.
pub async fn batch_insert(
    session: &mut dyn Session,
    table: &ResolvedTable,
    columns: &[String],
    rows: &[Vec<SqlValue<'_>>],
    batch_size: usize,
) -> Result<u64> {
    if rows.is_empty() {
        debug!("no rows to insert into {}", table);
        return Ok(0);
    }
    check_table(&*session, table, Some(columns)).await?;

    let statements = encode(table, columns, rows, batch_size)?;
    session.execute_atomic(&statements).await?;

    info!(
        "inserted {} rows into {} in {} batch(es)",
        rows.len(),
        table,
        statements.len()
    );
    Ok(rows.len() as u64)
}
