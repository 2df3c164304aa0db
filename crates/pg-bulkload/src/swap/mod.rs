//! Atomic swap of staged data into live tables.
//!
//! The swap runs in exactly one transaction: for each target, in caller
//! order, truncate it, restart its sequence, insert from the shadow table and
//! drop the shadow table. Either every target changes or none does. After
//! commit, sequences are repaired and targets optionally vacuumed; both are
//! best-effort.

mod plan;

use serde::Serialize;
use tracing::{info, warn};

use crate::core::table::ResolvedTable;
use crate::error::{LoadError, Result};
use crate::sequence::{self, RepairOutcome};
use crate::session::Session;
use crate::staging::{is_staging_name_for, staging_prefix_for, StagingResult, StagingTable};

pub use plan::{build_plan, SwapOptions, SwapPlan, SwapStep};

/// What happened to one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSwap {
    pub target: ResolvedTable,
    pub staging: StagingTable,
    pub rows: u64,
    /// `None` when the target has no sequence.
    pub repair: Option<RepairOutcome>,
    pub vacuumed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SwapReport {
    pub tables: Vec<TableSwap>,
}

impl SwapReport {
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

/// Swap staged data into the targets.
///
/// On failure everything is rolled back and the shadow tables are left in
/// place; the error is [`LoadError::Transaction`] (or a precondition error
/// from planning).
pub async fn swap(
    session: &mut dyn Session,
    staged: &[StagingResult],
    options: &SwapOptions,
) -> Result<SwapReport> {
    let plan = build_plan(&*session, staged, options).await?;
    if plan.is_empty() {
        return Ok(SwapReport::default());
    }
    let statements = plan.statements()?;

    info!(
        "swapping {} table(s) in one transaction ({} statements)",
        plan.steps.len(),
        statements.len()
    );
    if let Err(e) = session.execute_atomic(&statements).await {
        let leftover: Vec<String> = plan.steps.iter().map(|s| s.staging.to_string()).collect();
        warn!(
            "swap rolled back; shadow tables left in place: {}",
            leftover.join(", ")
        );
        return Err(e);
    }

    let mut tables = Vec::with_capacity(plan.steps.len());
    for (step, result) in plan.steps.iter().zip(staged) {
        let repair = if step.sequence_exists {
            Some(sequence::repair_sequence(&*session, &step.target, None).await)
        } else {
            None
        };
        tables.push(TableSwap {
            target: step.target.clone(),
            staging: step.staging.clone(),
            rows: result.rows,
            repair,
            vacuumed: false,
        });
    }

    if options.vacuum_after {
        for table in &mut tables {
            table.vacuumed = vacuum_analyze(&*session, &table.target).await;
        }
    }

    info!("swap committed for {} table(s)", tables.len());
    Ok(SwapReport { tables })
}

/// `VACUUM ANALYZE` a table. Failures are logged and reported as `false`.
pub async fn vacuum_analyze(session: &dyn Session, table: &ResolvedTable) -> bool {
    let sql = match table.qualified() {
        Ok(name) => format!("VACUUM ANALYZE {}", name),
        Err(e) => {
            warn!("cannot vacuum {}: {}", table, e);
            return false;
        }
    };
    match session.execute(&sql).await {
        Ok(()) => true,
        Err(e) => {
            warn!("VACUUM ANALYZE {} failed: {}", table, e);
            false
        }
    }
}

/// Drop shadow tables. Returns how many were dropped; failures are logged.
pub async fn cleanup(session: &dyn Session, tables: &[StagingTable]) -> usize {
    let mut dropped = 0;
    for table in tables {
        let sql = match table.qualified() {
            Ok(name) => format!("DROP TABLE IF EXISTS {}", name),
            Err(e) => {
                warn!("cannot drop {}: {}", table, e);
                continue;
            }
        };
        match session.execute(&sql).await {
            Ok(()) => {
                info!("dropped shadow table {}", table);
                dropped += 1;
            }
            Err(e) => warn!("failed to drop shadow table {}: {}", table, e),
        }
    }
    dropped
}

/// Shadow tables left behind for `target` by earlier failed runs.
pub async fn find_orphaned_staging(
    session: &dyn Session,
    target: &ResolvedTable,
) -> Result<Vec<StagingTable>> {
    let prefix = staging_prefix_for(&target.table);
    let names = session.list_tables(&target.schema, &prefix).await?;
    Ok(names
        .into_iter()
        .filter(|name| is_staging_name_for(&target.table, name))
        .map(|name| StagingTable::new(target.schema.clone(), name))
        .collect())
}

/// Options for [`copy_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CopyTableOptions {
    /// Empty the source table (and restart its sequence) in the same transaction.
    pub truncate_source: bool,
    pub vacuum_after: bool,
}

impl Default for CopyTableOptions {
    fn default() -> Self {
        Self {
            truncate_source: true,
            vacuum_after: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyTableReport {
    pub source: ResolvedTable,
    pub dest: ResolvedTable,
    pub repair: Option<RepairOutcome>,
    pub vacuumed: bool,
}

/// Replace the contents of `dest` with the rows of `source` in one transaction.
///
/// With `truncate_source`, the source is emptied in the same transaction so
/// it is ready to be filled again.
pub async fn copy_table(
    session: &mut dyn Session,
    source: &ResolvedTable,
    dest: &ResolvedTable,
    options: &CopyTableOptions,
) -> Result<CopyTableReport> {
    for table in [source, dest] {
        if !session.table_exists(&table.schema, &table.table).await? {
            return Err(LoadError::precondition(format!(
                "table {} does not exist",
                table
            )));
        }
    }
    if source.schema == dest.schema && source.table == dest.table {
        return Err(LoadError::precondition(format!(
            "source and destination are the same table: {}",
            dest
        )));
    }

    let dest_seq = sequence::sequence_exists(&*session, &dest.sequence).await?;
    let mut statements = vec![format!("TRUNCATE TABLE {}", dest.qualified()?)];
    if dest_seq {
        statements.extend(sequence::reset_statements(dest)?);
    }
    statements.push(format!(
        "INSERT INTO {} SELECT * FROM {}",
        dest.qualified()?,
        source.qualified()?
    ));
    if options.truncate_source {
        statements.push(format!("TRUNCATE TABLE {}", source.qualified()?));
        if sequence::sequence_exists(&*session, &source.sequence).await? {
            statements.extend(sequence::reset_statements(source)?);
        }
    }

    session.execute_atomic(&statements).await?;
    info!("copied {} into {}", source, dest);

    let repair = if dest_seq {
        Some(sequence::repair_sequence(&*session, dest, None).await)
    } else {
        None
    };
    let vacuumed = options.vacuum_after && vacuum_analyze(&*session, dest).await;

    Ok(CopyTableReport {
        source: source.clone(),
        dest: dest.clone(),
        repair,
        vacuumed,
    })
}
