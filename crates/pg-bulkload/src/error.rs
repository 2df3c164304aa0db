//! Error types for the bulk loader.

use thiserror::Error;

use crate::staging::StagingTable;

/// Exit code for configuration and YAML errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for failed preconditions (missing tables, columns, bad input).
pub const EXIT_PRECONDITION_ERROR: u8 = 2;
/// Exit code for database and connection pool errors.
pub const EXIT_DATABASE_ERROR: u8 = 3;
/// Exit code for COPY protocol failures.
pub const EXIT_COPY_ERROR: u8 = 4;
/// Exit code for a rolled back swap transaction.
pub const EXIT_TRANSACTION_ERROR: u8 = 5;
/// Exit code for staging failures.
pub const EXIT_STAGING_ERROR: u8 = 6;
/// Exit code for file I/O errors.
pub const EXIT_IO_ERROR: u8 = 7;
/// Exit code for JSON output errors.
pub const EXIT_JSON_ERROR: u8 = 8;
/// Exit code when interrupted by a signal.
pub const EXIT_CANCELLED: u8 = 130;

/// Main error type for bulk load operations.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Configuration error (invalid YAML, missing fields, bad identifiers).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A referenced table, column or sequence is missing, or input is malformed.
    ///
    /// Raised before anything is mutated.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Connection pool error with context.
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// COPY stream failed. The COPY was aborted before this was returned.
    #[error("COPY failed for {target}: {message}")]
    Copy { target: String, message: String },

    /// A statement inside the swap transaction failed and everything was rolled back.
    #[error("Transaction rolled back at `{statement}`: {message}")]
    Transaction { statement: String, message: String },

    /// Staging failed part way. `created` lists shadow tables left behind.
    #[error("Staging failed for table {table} ({} shadow table(s) created): {source}", created.len())]
    Staging {
        table: String,
        created: Vec<StagingTable>,
        #[source]
        source: Box<LoadError>,
    },

    /// IO error (file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation cancelled (SIGINT, SIGTERM).
    #[error("Operation cancelled")]
    Cancelled,
}

impl LoadError {
    /// Create a Pool error with context about where it occurred.
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        LoadError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Precondition error.
    pub fn precondition(message: impl Into<String>) -> Self {
        LoadError::Precondition(message.into())
    }

    /// Create a Copy error.
    pub fn copy(target: impl Into<String>, message: impl std::fmt::Display) -> Self {
        LoadError::Copy {
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// Create a Transaction error.
    pub fn transaction(statement: impl Into<String>, message: impl std::fmt::Display) -> Self {
        LoadError::Transaction {
            statement: statement.into(),
            message: message.to_string(),
        }
    }

    /// Shadow tables left behind by a failed staging run, if any.
    pub fn leftover_staging(&self) -> &[StagingTable] {
        match self {
            LoadError::Staging { created, .. } => created,
            _ => &[],
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            LoadError::Config(_) | LoadError::Yaml(_) => EXIT_CONFIG_ERROR,
            LoadError::Precondition(_) => EXIT_PRECONDITION_ERROR,
            LoadError::Database(_) | LoadError::Pool { .. } => EXIT_DATABASE_ERROR,
            LoadError::Copy { .. } => EXIT_COPY_ERROR,
            LoadError::Transaction { .. } => EXIT_TRANSACTION_ERROR,
            LoadError::Staging { .. } => EXIT_STAGING_ERROR,
            LoadError::Io(_) => EXIT_IO_ERROR,
            LoadError::Json(_) => EXIT_JSON_ERROR,
            LoadError::Cancelled => EXIT_CANCELLED,
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for bulk load operations.
pub type Result<T> = std::result::Result<T, LoadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(LoadError::Config("x".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(
            LoadError::precondition("missing").exit_code(),
            EXIT_PRECONDITION_ERROR
        );
        assert_eq!(LoadError::copy("t", "boom").exit_code(), EXIT_COPY_ERROR);
        assert_eq!(
            LoadError::transaction("TRUNCATE", "boom").exit_code(),
            EXIT_TRANSACTION_ERROR
        );
        assert_eq!(LoadError::Cancelled.exit_code(), EXIT_CANCELLED);
    }

    #[test]
    fn test_staging_error_keeps_created_tables_and_chain() {
        let err = LoadError::Staging {
            table: "public.users".into(),
            created: vec![StagingTable::new("public", "temp_users_1_001")],
            source: Box::new(LoadError::copy("temp_users_1_001", "bad row")),
        };

        assert_eq!(err.leftover_staging().len(), 1);
        assert_eq!(err.exit_code(), EXIT_STAGING_ERROR);

        let detailed = err.format_detailed();
        assert!(detailed.contains("Staging failed for table public.users"));
        assert!(detailed.contains("Caused by:"));
        assert!(detailed.contains("bad row"));
    }

    #[test]
    fn test_leftover_staging_empty_for_other_errors() {
        assert!(LoadError::Cancelled.leftover_staging().is_empty());
    }
}
