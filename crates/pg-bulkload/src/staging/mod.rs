//! Staging: load incoming data into shadow tables.
//!
//! COPY cannot run inside the transaction that truncates and refills the
//! targets, so data is first copied into shadow tables shaped like each
//! target (`CREATE TABLE ... (LIKE target INCLUDING DEFAULTS)`). Staging runs
//! outside any transaction; the swap step consumes and drops the shadow
//! tables later.

pub mod naming;

use std::path::PathBuf;

use bytes::Bytes;
use serde::Serialize;
use tokio::io::AsyncRead;
use tracing::{debug, info};

use crate::copy::{self, DEFAULT_CHUNK_BYTES};
use crate::core::identifier::qualify_pg;
use crate::core::table::{ResolvedTable, TableRef};
use crate::error::{LoadError, Result};
use crate::session::Session;

pub use naming::{
    is_staging_name_for, staging_name, staging_prefix_for, StagingNameGenerator, STAGING_PREFIX,
};

/// Where a staging job reads its CSV from.
#[derive(Debug, Clone)]
pub enum LoadSource {
    File(PathBuf),
    Bytes(Bytes),
}

/// One table to stage.
#[derive(Debug, Clone)]
pub struct LoadSpec {
    pub target: TableRef,
    pub source: LoadSource,
    /// Restrict the COPY to these columns. All columns when `None`.
    pub columns: Option<Vec<String>>,
    /// Empty the source file once the swap has committed.
    pub truncate_source_after_load: bool,
}

impl LoadSpec {
    pub fn from_file(target: impl Into<TableRef>, path: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            source: LoadSource::File(path.into()),
            columns: None,
            truncate_source_after_load: false,
        }
    }

    pub fn from_bytes(target: impl Into<TableRef>, data: impl Into<Bytes>) -> Self {
        Self {
            target: target.into(),
            source: LoadSource::Bytes(data.into()),
            columns: None,
            truncate_source_after_load: false,
        }
    }

    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn truncate_source_after_load(mut self, yes: bool) -> Self {
        self.truncate_source_after_load = yes;
        self
    }
}

/// A shadow table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagingTable {
    pub schema: String,
    pub name: String,
}

impl StagingTable {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    pub fn qualified(&self) -> Result<String> {
        qualify_pg(&self.schema, &self.name)
    }
}

impl std::fmt::Display for StagingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// A staged table ready for the swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingResult {
    pub target: ResolvedTable,
    pub staging: StagingTable,
    pub rows: u64,
}

type SourceReader = Box<dyn AsyncRead + Unpin + Send>;

async fn open_source(source: &LoadSource) -> Result<SourceReader> {
    match source {
        LoadSource::File(path) => {
            let file = tokio::fs::File::open(path).await.map_err(|e| {
                LoadError::Io(std::io::Error::new(
                    e.kind(),
                    format!("opening {}: {}", path.display(), e),
                ))
            })?;
            Ok(Box::new(file))
        }
        LoadSource::Bytes(data) => Ok(Box::new(std::io::Cursor::new(data.clone()))),
    }
}

/// Stage every spec into its own shadow table.
///
/// Preconditions (target and columns exist, source readable) are checked
/// before each shadow table is created. If anything fails after the first
/// shadow table exists, the error is [`LoadError::Staging`] and lists every
/// shadow table created so far; dropping them is up to the caller.
pub async fn stage(
    session: &dyn Session,
    specs: &[LoadSpec],
    chunk_bytes: usize,
) -> Result<Vec<StagingResult>> {
    let chunk_bytes = if chunk_bytes == 0 {
        DEFAULT_CHUNK_BYTES
    } else {
        chunk_bytes
    };
    let mut results: Vec<StagingResult> = Vec::with_capacity(specs.len());
    let mut created: Vec<StagingTable> = Vec::new();

    for spec in specs {
        let target = spec.target.resolve();
        if let Err(source) =
            stage_one(session, spec, &target, chunk_bytes, &mut created, &mut results).await
        {
            if created.is_empty() {
                return Err(source);
            }
            return Err(LoadError::Staging {
                table: target.to_string(),
                created,
                source: Box::new(source),
            });
        }
    }

    Ok(results)
}

async fn stage_one(
    session: &dyn Session,
    spec: &LoadSpec,
    target: &ResolvedTable,
    chunk_bytes: usize,
    created: &mut Vec<StagingTable>,
    results: &mut Vec<StagingResult>,
) -> Result<()> {
    let columns = spec.columns.as_deref();
    copy::check_table(session, target, columns).await?;
    let mut reader = open_source(&spec.source).await?;

    let staging = StagingTable::new(target.schema.clone(), staging_name(&target.table));
    let create = format!(
        "CREATE TABLE {} (LIKE {} INCLUDING DEFAULTS)",
        staging.qualified()?,
        target.qualified()?
    );
    debug!("{}", create);
    session.execute(&create).await?;
    created.push(staging.clone());

    let rows = copy::copy_into(
        session,
        &staging.qualified()?,
        &staging.to_string(),
        &mut reader,
        columns,
        chunk_bytes,
    )
    .await?;
    info!("staged {} rows for {} in {}", rows, target, staging.name);

    results.push(StagingResult {
        target: target.clone(),
        staging,
        rows,
    });
    Ok(())
}
