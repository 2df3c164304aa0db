//! In-memory session for unit tests.
//!
//! Tracks a tiny catalog (tables with columns, sequences), applies the
//! `CREATE TABLE`/`DROP TABLE`/`TRUNCATE` statements the loader issues to it,
//! and records everything else. Statements containing a registered failure
//! fragment fail.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{CopyReader, CopyWriter, Session};
use crate::error::{LoadError, Result};

type Key = (String, String);

#[derive(Default)]
pub(crate) struct FakeSession {
    tables: Mutex<BTreeMap<Key, Vec<String>>>,
    sequences: BTreeSet<Key>,
    scalars: Vec<(String, Option<i64>)>,
    fail_on: Vec<String>,
    copy_out_data: Vec<u8>,
    copy_out_chunk: usize,
    log: Mutex<Vec<String>>,
    committed: Mutex<Vec<Vec<String>>>,
    rollbacks: Mutex<usize>,
    copied_in: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self {
            copy_out_chunk: 7,
            ..Default::default()
        }
    }

    pub fn with_table(self, schema: &str, table: &str, columns: &[&str]) -> Self {
        self.tables.lock().unwrap().insert(
            (schema.to_string(), table.to_string()),
            columns.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    pub fn with_sequence(mut self, schema: &str, sequence: &str) -> Self {
        self.sequences
            .insert((schema.to_string(), sequence.to_string()));
        self
    }

    /// `query_i64` returns `value` for SQL containing `fragment`.
    pub fn with_scalar(mut self, fragment: &str, value: Option<i64>) -> Self {
        self.scalars.push((fragment.to_string(), value));
        self
    }

    /// Any statement containing `fragment` fails.
    pub fn fail_on(mut self, fragment: &str) -> Self {
        self.fail_on.push(fragment.to_string());
        self
    }

    /// Bytes produced by every `copy_out`, delivered in chunks of `chunk` bytes.
    pub fn with_copy_out(mut self, data: &[u8], chunk: usize) -> Self {
        self.copy_out_data = data.to_vec();
        self.copy_out_chunk = chunk.max(1);
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn committed(&self) -> Vec<Vec<String>> {
        self.committed.lock().unwrap().clone()
    }

    pub fn rollbacks(&self) -> usize {
        *self.rollbacks.lock().unwrap()
    }

    pub fn copied_in(&self) -> Vec<(String, Vec<u8>)> {
        self.copied_in.lock().unwrap().clone()
    }

    pub fn has_table(&self, schema: &str, table: &str) -> bool {
        self.tables
            .lock()
            .unwrap()
            .contains_key(&(schema.to_string(), table.to_string()))
    }

    pub fn table_names(&self, schema: &str) -> Vec<String> {
        self.tables
            .lock()
            .unwrap()
            .keys()
            .filter(|(s, _)| s == schema)
            .map(|(_, t)| t.clone())
            .collect()
    }

    fn check_failure(&self, sql: &str) -> Result<()> {
        if self.fail_on.iter().any(|f| sql.contains(f.as_str())) {
            return Err(LoadError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("injected failure: {}", sql),
            )));
        }
        Ok(())
    }

    /// Mirror DDL effects into the fake catalog.
    fn apply(&self, sql: &str) {
        let idents = quoted_identifiers(sql);
        let mut tables = self.tables.lock().unwrap();
        if sql.starts_with("CREATE TABLE") && idents.len() >= 4 {
            let like = (idents[2].clone(), idents[3].clone());
            let columns = tables.get(&like).cloned().unwrap_or_default();
            tables.insert((idents[0].clone(), idents[1].clone()), columns);
        } else if sql.starts_with("DROP TABLE") && idents.len() >= 2 {
            tables.remove(&(idents[0].clone(), idents[1].clone()));
        }
    }
}

/// Double-quoted identifiers in order of appearance.
fn quoted_identifiers(sql: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '"' {
            continue;
        }
        let mut ident = String::new();
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    ident.push('"');
                } else {
                    break;
                }
            } else {
                ident.push(c);
            }
        }
        out.push(ident);
    }
    out
}

#[async_trait]
impl Session for FakeSession {
    async fn execute(&self, sql: &str) -> Result<()> {
        self.log.lock().unwrap().push(sql.to_string());
        self.check_failure(sql)?;
        self.apply(sql);
        Ok(())
    }

    async fn query_i64(&self, sql: &str) -> Result<Option<i64>> {
        self.log.lock().unwrap().push(sql.to_string());
        self.check_failure(sql)?;
        Ok(self
            .scalars
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .and_then(|(_, value)| *value))
    }

    async fn execute_atomic(&mut self, statements: &[String]) -> Result<()> {
        for statement in statements {
            self.log.lock().unwrap().push(statement.clone());
            if self.check_failure(statement).is_err() {
                *self.rollbacks.lock().unwrap() += 1;
                return Err(LoadError::transaction(
                    statement.clone(),
                    "injected failure",
                ));
            }
        }
        for statement in statements {
            self.apply(statement);
        }
        self.committed.lock().unwrap().push(statements.to_vec());
        Ok(())
    }

    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        Ok(self.has_table(schema, table))
    }

    async fn sequence_exists(&self, schema: &str, sequence: &str) -> Result<bool> {
        Ok(self
            .sequences
            .contains(&(schema.to_string(), sequence.to_string())))
    }

    async fn table_columns(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(&(schema.to_string(), table.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_tables(&self, schema: &str, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .table_names(schema)
            .into_iter()
            .filter(|t| t.starts_with(prefix))
            .collect())
    }

    async fn copy_in(
        &self,
        statement: &str,
        reader: CopyReader<'_>,
        _chunk_bytes: usize,
    ) -> Result<u64> {
        self.log.lock().unwrap().push(statement.to_string());
        if self.check_failure(statement).is_err() {
            return Err(LoadError::copy(statement, "injected failure"));
        }
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        let rows = String::from_utf8_lossy(&data)
            .lines()
            .filter(|l| !l.is_empty())
            .count()
            .saturating_sub(1) as u64;
        self.copied_in
            .lock()
            .unwrap()
            .push((statement.to_string(), data));
        Ok(rows)
    }

    async fn copy_out(&self, statement: &str, writer: CopyWriter<'_>) -> Result<u64> {
        self.log.lock().unwrap().push(statement.to_string());
        if self.check_failure(statement).is_err() {
            return Err(LoadError::copy(statement, "injected failure"));
        }
        for chunk in self.copy_out_data.chunks(self.copy_out_chunk) {
            writer.write_all(chunk).await?;
        }
        writer.flush().await?;
        Ok(self.copy_out_data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_identifiers() {
        assert_eq!(
            quoted_identifiers(r#"CREATE TABLE "public"."a""b" (LIKE "s"."t")"#),
            vec!["public", "a\"b", "s", "t"]
        );
    }

    #[tokio::test]
    async fn test_create_like_copies_columns() {
        let session = FakeSession::new().with_table("public", "users", &["id", "name"]);
        session
            .execute(r#"CREATE TABLE "public"."tmp" (LIKE "public"."users" INCLUDING DEFAULTS)"#)
            .await
            .unwrap();
        assert_eq!(
            session.table_columns("public", "tmp").await.unwrap(),
            vec!["id", "name"]
        );
    }
}
