//! Configuration type definitions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::copy::DEFAULT_CHUNK_BYTES;
use crate::core::table::{TableRef, DEFAULT_PRIMARY_KEY};
use crate::error::{LoadError, Result};
use crate::staging::LoadSpec;
use crate::swap::SwapOptions;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target database connection.
    pub database: DatabaseConfig,

    /// Load behavior.
    #[serde(default)]
    pub load: LoadConfig,

    /// Tables handled by `import` and `export`, in processing order.
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

/// PostgreSQL connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,

    /// Port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    pub database: String,

    pub user: String,

    /// Never written back out.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,

    /// Pool size (default: 2, one for staging and one spare).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Load behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Bytes per COPY chunk (default: 64 KiB).
    #[serde(default = "default_copy_chunk_bytes")]
    pub copy_chunk_bytes: usize,

    /// Append instead of replacing table contents.
    #[serde(default)]
    pub skip_truncate: bool,

    /// VACUUM ANALYZE each table after the swap.
    #[serde(default)]
    pub vacuum_after: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            copy_chunk_bytes: default_copy_chunk_bytes(),
            skip_truncate: false,
            vacuum_after: false,
        }
    }
}

impl LoadConfig {
    pub fn swap_options(&self) -> SwapOptions {
        SwapOptions {
            skip_truncate: self.skip_truncate,
            vacuum_after: self.vacuum_after,
        }
    }
}

/// One table entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Table name, optionally schema-qualified.
    pub table: String,

    #[serde(default = "default_primary_key")]
    pub primary_key: String,

    /// CSV file read by `import` and written by `export`.
    #[serde(default)]
    pub csv_path: Option<PathBuf>,

    /// Restrict COPY to these columns.
    #[serde(default)]
    pub columns: Option<Vec<String>>,

    /// Empty the CSV file after a successful import.
    #[serde(default)]
    pub truncate_source: bool,
}

impl TableConfig {
    pub fn table_ref(&self) -> TableRef {
        TableRef::new(self.table.clone()).with_primary_key(self.primary_key.clone())
    }

    /// Staging job for this entry. Requires `csv_path`.
    pub fn load_spec(&self) -> Result<LoadSpec> {
        let path = self.csv_path.clone().ok_or_else(|| {
            LoadError::Config(format!("tables[{}].csv_path is required", self.table))
        })?;
        let mut spec = LoadSpec::from_file(self.table_ref(), path)
            .truncate_source_after_load(self.truncate_source);
        if let Some(columns) = &self.columns {
            spec = spec.with_columns(columns.clone());
        }
        Ok(spec)
    }
}

// Default value functions for serde
fn default_pg_port() -> u16 {
    5432
}

fn default_require() -> String {
    "require".to_string()
}

fn default_max_connections() -> usize {
    2
}

fn default_copy_chunk_bytes() -> usize {
    DEFAULT_CHUNK_BYTES
}

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}
