//! Identifier validation and quoting.
//!
//! TRUNCATE, ALTER SEQUENCE, COPY and CREATE TABLE ... LIKE cannot take
//! identifiers as bind parameters, so every statement the loader issues is
//! built as text. All identifier interpolation in the crate goes through this
//! module:
//!
//! 1. Validate the identifier (non-empty, no NUL bytes, bounded length)
//! 2. Wrap it in double quotes, doubling any embedded double quote
//!
//! Callers additionally check tables and columns against the catalog before
//! building SQL with them.

use crate::error::{LoadError, Result};

/// Maximum identifier length accepted before quoting.
///
/// PostgreSQL truncates identifiers at 63 bytes; anything well past that is
/// almost certainly not a real table or column name.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// PostgreSQL's NAMEDATALEN - 1.
pub const PG_MAX_IDENTIFIER_BYTES: usize = 63;

/// Validate an identifier for security issues.
///
/// Rejects:
/// - Empty identifiers
/// - Identifiers containing null bytes
/// - Identifiers exceeding maximum length
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LoadError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(LoadError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(LoadError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// ```ignore
/// assert_eq!(quote_pg("users")?, "\"users\"");
/// assert_eq!(quote_pg("table\"name")?, "\"table\"\"name\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a PostgreSQL relation name with its schema.
pub fn qualify_pg(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(table)?))
}

/// Quote a comma-separated column list.
pub fn quote_column_list(columns: &[String]) -> Result<String> {
    let quoted = columns
        .iter()
        .map(|c| quote_pg(c))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

/// Quote a string literal, doubling embedded single quotes.
///
/// Used for regclass arguments such as `setval('"public"."users_id_seq"', 10)`.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Truncate a string to at most `max_bytes` without splitting a character.
pub fn truncate_on_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
