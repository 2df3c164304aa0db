//! End-to-end bulk loads.
//!
//! [`replace_tables`] wires the pieces together: stage every source into a
//! shadow table, swap them all into the targets in one transaction, repair
//! sequences, then empty any source files flagged for it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::copy::{self, CopySource, DEFAULT_CHUNK_BYTES};
use crate::error::{LoadError, Result};
use crate::sequence::{self, RepairOutcome};
use crate::session::Session;
use crate::staging::{self, LoadSource, LoadSpec, StagingTable};
use crate::swap::{self, SwapOptions, SwapStep};

/// Options for [`replace_tables`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub swap: SwapOptions,
    pub copy_chunk_bytes: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            swap: SwapOptions::default(),
            copy_chunk_bytes: DEFAULT_CHUNK_BYTES,
        }
    }
}

/// Per-table outcome of a load.
#[derive(Debug, Clone, Serialize)]
pub struct TableLoad {
    pub table: String,
    pub staging_table: String,
    pub rows: u64,
    pub repair: Option<RepairOutcome>,
    pub vacuumed: bool,
    pub source_truncated: bool,
}

/// Result of a load run.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    /// Unique run identifier.
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub total_rows: u64,
    pub tables: Vec<TableLoad>,
}

impl LoadReport {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Tables whose sequence repair failed after commit.
    pub fn failed_repairs(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.repair.as_ref().is_some_and(RepairOutcome::is_failed))
            .map(|t| t.table.as_str())
            .collect()
    }
}

/// Replace the contents of every target with its staged source.
///
/// Every precondition is checked before the first shadow table is created.
/// A staging failure drops the shadow tables created so far. A failed swap
/// transaction rolls back every target and leaves the shadow tables in place.
pub async fn replace_tables(
    session: &mut dyn Session,
    specs: &[LoadSpec],
    options: &LoadOptions,
) -> Result<LoadReport> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();
    let timer = Instant::now();
    info!("Starting load run {} for {} table(s)", run_id, specs.len());

    check_specs(&*session, specs).await?;

    let staged = match staging::stage(&*session, specs, options.copy_chunk_bytes).await {
        Ok(staged) => staged,
        Err(e) => {
            let leftover = e.leftover_staging();
            if !leftover.is_empty() {
                let dropped = swap::cleanup(&*session, leftover).await;
                warn!(
                    "staging failed; dropped {} of {} shadow table(s)",
                    dropped,
                    leftover.len()
                );
            }
            return Err(e);
        }
    };

    let swapped = match swap::swap(&mut *session, &staged, &options.swap).await {
        Ok(swapped) => swapped,
        // rejected before the transaction began, so the shadow tables are unused
        Err(e @ LoadError::Precondition(_)) => {
            let leftover: Vec<StagingTable> = staged.iter().map(|s| s.staging.clone()).collect();
            let dropped = swap::cleanup(&*session, &leftover).await;
            warn!(
                "swap rejected; dropped {} of {} shadow table(s)",
                dropped,
                leftover.len()
            );
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    let mut tables = Vec::with_capacity(swapped.tables.len());
    for (table, spec) in swapped.tables.into_iter().zip(specs) {
        let source_truncated = match (&spec.source, spec.truncate_source_after_load) {
            (LoadSource::File(path), true) => truncate_file(path).await,
            _ => false,
        };
        tables.push(TableLoad {
            table: table.target.to_string(),
            staging_table: table.staging.name,
            rows: table.rows,
            repair: table.repair,
            vacuumed: table.vacuumed,
            source_truncated,
        });
    }

    let total_rows = tables.iter().map(|t| t.rows).sum();
    let report = LoadReport {
        run_id,
        started_at,
        completed_at: Utc::now(),
        duration_seconds: timer.elapsed().as_secs_f64(),
        total_rows,
        tables,
    };
    info!(
        "Load run {} complete: {} rows in {:.2}s",
        report.run_id, report.total_rows, report.duration_seconds
    );
    for table in report.failed_repairs() {
        warn!("sequence for {} may be out of sync with its data", table);
    }
    Ok(report)
}

async fn truncate_file(path: &Path) -> bool {
    match tokio::fs::File::create(path).await {
        Ok(_) => {
            info!("emptied source file {}", path.display());
            true
        }
        Err(e) => {
            warn!("could not empty source file {}: {}", path.display(), e);
            false
        }
    }
}

/// Preconditions of a whole load, checked before anything is created.
///
/// Targets must be distinct and exist with every listed column, and file
/// sources must be readable.
async fn check_specs(session: &dyn Session, specs: &[LoadSpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for spec in specs {
        let target = spec.target.resolve();
        if !seen.insert(target.to_string()) {
            return Err(LoadError::precondition(format!(
                "table {} appears more than once",
                target
            )));
        }
        copy::check_table(session, &target, spec.columns.as_deref()).await?;
        if let LoadSource::File(path) = &spec.source {
            tokio::fs::metadata(path).await.map_err(|e| {
                LoadError::Io(std::io::Error::new(
                    e.kind(),
                    format!("{}: {}", path.display(), e),
                ))
            })?;
        }
    }
    Ok(())
}

/// Dry-run result: what a load would do.
#[derive(Debug, Clone, Serialize)]
pub struct LoadPlan {
    pub steps: Vec<SwapStep>,
    /// Statements run outside any transaction, per table.
    pub staging_statements: Vec<String>,
    /// Statements of the swap transaction.
    pub swap_statements: Vec<String>,
}

/// Check every precondition of a load without changing anything.
///
/// Shadow table names in the returned statements are examples; a real run
/// generates fresh ones.
pub async fn plan(
    session: &dyn Session,
    specs: &[LoadSpec],
    options: &LoadOptions,
) -> Result<LoadPlan> {
    check_specs(session, specs).await?;

    let mut steps = Vec::with_capacity(specs.len());
    let mut staging_statements = Vec::new();

    for spec in specs {
        let target = spec.target.resolve();
        let columns = spec.columns.as_deref();
        let staging = StagingTable::new(
            target.schema.clone(),
            staging::staging_name(&target.table),
        );
        staging_statements.push(format!(
            "CREATE TABLE {} (LIKE {} INCLUDING DEFAULTS)",
            staging.qualified()?,
            target.qualified()?
        ));
        staging_statements.push(copy::import_statement_for(&staging.qualified()?, columns)?);

        let sequence_exists = sequence::sequence_exists(session, &target.sequence).await?;
        steps.push(SwapStep {
            target,
            staging,
            truncate: !options.swap.skip_truncate,
            sequence_exists,
        });
    }

    let mut swap_statements = Vec::new();
    for step in &steps {
        swap_statements.extend(step.statements()?);
    }

    Ok(LoadPlan {
        steps,
        staging_statements,
        swap_statements,
    })
}

/// One export job.
#[derive(Debug, Clone)]
pub struct ExportSpec {
    pub source: CopySource,
    pub path: PathBuf,
    pub columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedTable {
    pub source: String,
    pub path: PathBuf,
    pub rows: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub total_rows: u64,
    pub exports: Vec<ExportedTable>,
}

impl ExportReport {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Export several sources to CSV files, one after another.
pub async fn export_tables(session: &dyn Session, exports: &[ExportSpec]) -> Result<ExportReport> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();
    let timer = Instant::now();

    let mut done = Vec::with_capacity(exports.len());
    for export in exports {
        let rows =
            copy::export_to_file(session, &export.source, &export.path, export.columns.as_deref())
                .await?;
        done.push(ExportedTable {
            source: match &export.source {
                CopySource::Table(t) => t.to_string(),
                CopySource::Query(q) => q.clone(),
            },
            path: export.path.clone(),
            rows,
        });
    }

    Ok(ExportReport {
        run_id,
        started_at,
        completed_at: Utc::now(),
        duration_seconds: timer.elapsed().as_secs_f64(),
        total_rows: done.iter().map(|e| e.rows).sum(),
        exports: done,
    })
}
