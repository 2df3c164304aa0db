//! # pg-bulkload
//!
//! Staged COPY-then-swap bulk loading for PostgreSQL.
//!
//! COPY cannot share a transaction with the TRUNCATE and sequence resets that
//! replacing a table needs. This library works around that in three steps:
//!
//! - **Stage**: COPY each source into a shadow table, outside any transaction
//! - **Swap**: in one transaction, truncate every target, restart its
//!   sequence, insert from the shadow table and drop it
//! - **Repair**: after commit, move each sequence past the loaded keys
//!
//! It also streams CSV exports, copies tables into each other, and builds
//! literal batch inserts for small in-memory loads.
//!
//! ## Example
//!
//! ```rust,no_run
//! use pg_bulkload::{loader, Config, LoadSpec, PgPool};
//!
//! #[tokio::main]
//! async fn main() -> pg_bulkload::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let pool = PgPool::new(&config.database).await?;
//!     let mut session = pool.session().await?;
//!
//!     let specs = vec![LoadSpec::from_file("public.users", "users.csv")];
//!     let report = loader::replace_tables(&mut session, &specs, &Default::default()).await?;
//!     println!("Loaded {} rows", report.total_rows);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod copy;
pub mod core;
pub mod error;
pub mod loader;
pub mod sequence;
pub mod session;
pub mod staging;
pub mod swap;

// Re-exports for convenient access
pub use config::{Config, DatabaseConfig, LoadConfig, TableConfig};
pub use copy::CopySource;
pub use crate::core::{ResolvedTable, SqlValue, TableLike, TableRef};
pub use error::{LoadError, Result};
pub use loader::{ExportSpec, LoadOptions, LoadReport};
pub use sequence::RepairOutcome;
pub use session::{PgPool, PgSession, Session, SslMode};
pub use staging::{LoadSource, LoadSpec, StagingResult, StagingTable};
pub use swap::{CopyTableOptions, SwapOptions};
