//! Sequence inspection and repair.
//!
//! Bulk inserts that carry explicit key values leave the key's sequence behind
//! the data. [`repair_sequence`] moves the sequence to the current maximum so
//! the next generated value does not collide. Tables without a matching
//! sequence are normal and are skipped.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::identifier::quote_literal;
use crate::core::table::{ResolvedTable, SequenceRef};
use crate::error::Result;
use crate::session::Session;

/// Why a repair did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No sequence named `<table>_<key>_seq` in the table's schema.
    NoSequence,
    /// No key at or above 1 (empty table, NULL or non-positive keys).
    EmptyTable,
}

/// Result of a best-effort sequence repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RepairOutcome {
    Repaired { max_id: i64 },
    Skipped { reason: SkipReason },
    Failed { message: String },
}

impl RepairOutcome {
    pub fn max_id(&self) -> Option<i64> {
        match self {
            RepairOutcome::Repaired { max_id } => Some(*max_id),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RepairOutcome::Failed { .. })
    }
}

impl std::fmt::Display for RepairOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepairOutcome::Repaired { max_id } => write!(f, "repaired (max id {})", max_id),
            RepairOutcome::Skipped {
                reason: SkipReason::NoSequence,
            } => write!(f, "skipped (no sequence)"),
            RepairOutcome::Skipped {
                reason: SkipReason::EmptyTable,
            } => write!(f, "skipped (empty table)"),
            RepairOutcome::Failed { message } => write!(f, "failed: {}", message),
        }
    }
}

/// Whether the sequence exists. Absence is not an error.
pub async fn sequence_exists(session: &dyn Session, sequence: &SequenceRef) -> Result<bool> {
    session
        .sequence_exists(&sequence.schema, &sequence.name)
        .await
}

/// Statements that restart a table's sequence and renumber its rows.
///
/// Only meaningful when the sequence exists; after a TRUNCATE the UPDATE
/// touches no rows, which leaves the sequence at its start value.
pub fn reset_statements(table: &ResolvedTable) -> Result<Vec<String>> {
    Ok(vec![
        format!("ALTER SEQUENCE {} RESTART", table.sequence.qualified()?),
        format!(
            "UPDATE {} SET {} = DEFAULT",
            table.qualified()?,
            table.quoted_key()?
        ),
    ])
}

/// The `SELECT MAX(key)` query, optionally restricted to keys below `cutoff`.
pub fn max_key_query(table: &ResolvedTable, cutoff: Option<i64>) -> Result<String> {
    let key = table.quoted_key()?;
    let mut sql = format!("SELECT MAX({})::bigint FROM {}", key, table.qualified()?);
    if let Some(cutoff) = cutoff {
        sql.push_str(&format!(" WHERE {} < {}", key, cutoff));
    }
    Ok(sql)
}

/// Move the sequence so its next value is `MAX(key) + 1`.
///
/// With `cutoff`, only keys below it count, which keeps a reserved range
/// above the cutoff out of the sequence. Never returns an error: failures are
/// logged and reported as [`RepairOutcome::Failed`].
pub async fn repair_sequence(
    session: &dyn Session,
    table: &ResolvedTable,
    cutoff: Option<i64>,
) -> RepairOutcome {
    match try_repair(session, table, cutoff).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("sequence repair for {} failed: {}", table, e);
            RepairOutcome::Failed {
                message: e.to_string(),
            }
        }
    }
}

async fn try_repair(
    session: &dyn Session,
    table: &ResolvedTable,
    cutoff: Option<i64>,
) -> Result<RepairOutcome> {
    if !session.table_exists(&table.schema, &table.table).await? {
        return Ok(RepairOutcome::Failed {
            message: format!("table {} does not exist", table),
        });
    }

    if !sequence_exists(session, &table.sequence).await? {
        debug!("no sequence {} for {}, skipping repair", table.sequence, table);
        return Ok(RepairOutcome::Skipped {
            reason: SkipReason::NoSequence,
        });
    }

    let max_id = session
        .query_i64(&max_key_query(table, cutoff)?)
        .await?
        .unwrap_or(0);
    if max_id < 1 {
        return Ok(RepairOutcome::Skipped {
            reason: SkipReason::EmptyTable,
        });
    }

    let sql = format!(
        "SELECT setval({}, {})",
        quote_literal(&table.sequence.qualified()?),
        max_id
    );
    session.execute(&sql).await?;
    info!("sequence {} set to {}", table.sequence, max_id);

    Ok(RepairOutcome::Repaired { max_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::table::TableRef;
    use crate::session::testing::FakeSession;

    fn users() -> ResolvedTable {
        TableRef::new("users").resolve()
    }

    #[test]
    fn test_reset_statements_order() {
        let stmts = reset_statements(&users()).unwrap();
        assert_eq!(
            stmts,
            vec![
                "ALTER SEQUENCE \"public\".\"users_id_seq\" RESTART",
                "UPDATE \"public\".\"users\" SET \"id\" = DEFAULT",
            ]
        );
    }

    #[test]
    fn test_max_key_query_with_cutoff() {
        assert_eq!(
            max_key_query(&users(), None).unwrap(),
            "SELECT MAX(\"id\")::bigint FROM \"public\".\"users\""
        );
        assert_eq!(
            max_key_query(&users(), Some(1000)).unwrap(),
            "SELECT MAX(\"id\")::bigint FROM \"public\".\"users\" WHERE \"id\" < 1000"
        );
    }

    #[tokio::test]
    async fn test_repair_sets_sequence_to_max() {
        let session = FakeSession::new()
            .with_table("public", "users", &["id", "name"])
            .with_sequence("public", "users_id_seq")
            .with_scalar("MAX(\"id\")", Some(104));

        let outcome = repair_sequence(&session, &users(), None).await;

        assert_eq!(outcome, RepairOutcome::Repaired { max_id: 104 });
        assert!(session
            .statements()
            .contains(&"SELECT setval('\"public\".\"users_id_seq\"', 104)".to_string()));
    }

    #[tokio::test]
    async fn test_repair_is_idempotent() {
        let session = FakeSession::new()
            .with_table("public", "users", &["id"])
            .with_sequence("public", "users_id_seq")
            .with_scalar("MAX(", Some(7));

        let first = repair_sequence(&session, &users(), None).await;
        let second = repair_sequence(&session, &users(), None).await;

        assert_eq!(first, second);
        let setvals: Vec<_> = session
            .statements()
            .into_iter()
            .filter(|s| s.starts_with("SELECT setval"))
            .collect();
        assert_eq!(setvals.len(), 2);
        assert_eq!(setvals[0], setvals[1]);
    }

    #[tokio::test]
    async fn test_repair_skips_without_sequence() {
        let session = FakeSession::new()
            .with_table("public", "users", &["id"])
            .with_scalar("MAX(", Some(10));

        let outcome = repair_sequence(&session, &users(), None).await;

        assert_eq!(
            outcome,
            RepairOutcome::Skipped {
                reason: SkipReason::NoSequence
            }
        );
        assert!(!session.statements().iter().any(|s| s.contains("setval")));
    }

    #[tokio::test]
    async fn test_repair_skips_empty_or_non_positive() {
        for max in [None, Some(0), Some(-5)] {
            let session = FakeSession::new()
                .with_table("public", "users", &["id"])
                .with_sequence("public", "users_id_seq")
                .with_scalar("MAX(", max);

            let outcome = repair_sequence(&session, &users(), None).await;

            assert_eq!(
                outcome,
                RepairOutcome::Skipped {
                    reason: SkipReason::EmptyTable
                }
            );
            assert!(!session.statements().iter().any(|s| s.contains("setval")));
        }
    }

    #[tokio::test]
    async fn test_repair_failure_is_reported_not_raised() {
        let session = FakeSession::new()
            .with_table("public", "users", &["id"])
            .with_sequence("public", "users_id_seq")
            .fail_on("setval");

        let session = session.with_scalar("MAX(", Some(3));
        let outcome = repair_sequence(&session, &users(), None).await;

        assert!(outcome.is_failed());
        assert_eq!(outcome.max_id(), None);
    }

    #[tokio::test]
    async fn test_repair_missing_table_fails() {
        let session = FakeSession::new();
        let outcome = repair_sequence(&session, &users(), None).await;
        assert!(matches!(outcome, RepairOutcome::Failed { message } if message.contains("does not exist")));
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let json = serde_json::to_string(&RepairOutcome::Repaired { max_id: 5 }).unwrap();
        assert_eq!(json, r#"{"status":"repaired","max_id":5}"#);

        let json = serde_json::to_string(&RepairOutcome::Skipped {
            reason: SkipReason::NoSequence,
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"skipped","reason":"no_sequence"}"#);
    }
}
