//! Swap plans: the ordered statements of the swap transaction.

use std::collections::HashSet;

use serde::Serialize;

use crate::core::table::ResolvedTable;
use crate::error::{LoadError, Result};
use crate::sequence;
use crate::session::Session;
use crate::staging::{StagingResult, StagingTable};

/// Options for the swap transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SwapOptions {
    /// Append to the targets instead of replacing their contents.
    pub skip_truncate: bool,
    /// Run `VACUUM ANALYZE` on each target after commit.
    pub vacuum_after: bool,
}

/// One target's part of the swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapStep {
    pub target: ResolvedTable,
    pub staging: StagingTable,
    pub truncate: bool,
    pub sequence_exists: bool,
}

impl SwapStep {
    /// Statements for this step, in execution order.
    pub fn statements(&self) -> Result<Vec<String>> {
        let target = self.target.qualified()?;
        let staging = self.staging.qualified()?;
        let mut out = Vec::with_capacity(5);

        if self.truncate {
            out.push(format!("TRUNCATE TABLE {}", target));
            if self.sequence_exists {
                out.extend(sequence::reset_statements(&self.target)?);
            }
        }
        out.push(format!("INSERT INTO {} SELECT * FROM {}", target, staging));
        out.push(format!("DROP TABLE {}", staging));
        Ok(out)
    }
}

/// All steps of one swap, executed as a single transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SwapPlan {
    pub steps: Vec<SwapStep>,
}

impl SwapPlan {
    pub fn statements(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for step in &self.steps {
            out.extend(step.statements()?);
        }
        Ok(out)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Check every target and shadow table and build the plan, in caller order.
///
/// Nothing is modified. Fails with a precondition error when a table is
/// missing or a target appears twice.
pub async fn build_plan(
    session: &dyn Session,
    staged: &[StagingResult],
    options: &SwapOptions,
) -> Result<SwapPlan> {
    let mut seen = HashSet::new();
    let mut steps = Vec::with_capacity(staged.len());

    for result in staged {
        let target = &result.target;
        if !seen.insert((target.schema.clone(), target.table.clone())) {
            return Err(LoadError::precondition(format!(
                "table {} appears more than once in the swap",
                target
            )));
        }
        if !session.table_exists(&target.schema, &target.table).await? {
            return Err(LoadError::precondition(format!(
                "table {} does not exist",
                target
            )));
        }
        let staging = &result.staging;
        if !session.table_exists(&staging.schema, &staging.name).await? {
            return Err(LoadError::precondition(format!(
                "staging table {} does not exist",
                staging
            )));
        }

        let sequence_exists = sequence::sequence_exists(session, &target.sequence).await?;
        steps.push(SwapStep {
            target: target.clone(),
            staging: staging.clone(),
            truncate: !options.skip_truncate,
            sequence_exists,
        });
    }

    Ok(SwapPlan { steps })
}
