//! Configuration validation.

use std::collections::HashSet;

use super::Config;
use crate::core::identifier::validate_identifier;
use crate::error::{LoadError, Result};
use crate::session::SslMode;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    let db = &config.database;
    if db.host.is_empty() {
        return Err(LoadError::Config("database.host is required".into()));
    }
    if db.database.is_empty() {
        return Err(LoadError::Config("database.database is required".into()));
    }
    if db.user.is_empty() {
        return Err(LoadError::Config("database.user is required".into()));
    }
    if db.max_connections == 0 {
        return Err(LoadError::Config(
            "database.max_connections must be at least 1".into(),
        ));
    }
    SslMode::parse(&db.ssl_mode)?;

    if config.load.copy_chunk_bytes == 0 {
        return Err(LoadError::Config(
            "load.copy_chunk_bytes must be at least 1".into(),
        ));
    }

    let mut seen = HashSet::new();
    for (i, entry) in config.tables.iter().enumerate() {
        let resolved = entry.table_ref().resolve();
        for ident in [&resolved.schema, &resolved.table, &resolved.primary_key] {
            validate_identifier(ident)
                .map_err(|e| LoadError::Config(format!("tables[{}]: {}", i, e)))?;
        }
        if let Some(columns) = &entry.columns {
            if columns.is_empty() {
                return Err(LoadError::Config(format!(
                    "tables[{}].columns must not be empty when given",
                    i
                )));
            }
            for column in columns {
                validate_identifier(column)
                    .map_err(|e| LoadError::Config(format!("tables[{}]: {}", i, e)))?;
            }
        }
        if !seen.insert(resolved.to_string()) {
            return Err(LoadError::Config(format!(
                "table {} is listed more than once",
                resolved
            )));
        }
    }

    Ok(())
}
