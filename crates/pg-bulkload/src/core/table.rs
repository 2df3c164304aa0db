//! Table references and their resolution.

use serde::{Deserialize, Serialize};

use crate::core::identifier::{qualify_pg, quote_pg};
use crate::error::{LoadError, Result};

/// Schema used when neither the name nor the reference carries one.
pub const DEFAULT_SCHEMA: &str = "public";

/// Primary key column assumed when none is given.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// A caller-facing reference to a table.
///
/// `name` may itself be schema-qualified (`"audit.events"`), in which case the
/// qualifier wins over `schema`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    #[serde(default)]
    pub schema: Option<String>,
    pub name: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
}

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}

/// Anything that can name a table and its key column.
pub trait TableLike {
    fn table_name(&self) -> &str;

    fn primary_key(&self) -> &str {
        DEFAULT_PRIMARY_KEY
    }
}

impl TableLike for TableRef {
    fn table_name(&self) -> &str {
        &self.name
    }

    fn primary_key(&self) -> &str {
        &self.primary_key
    }
}

impl TableLike for str {
    fn table_name(&self) -> &str {
        self
    }
}

impl TableLike for String {
    fn table_name(&self) -> &str {
        self
    }
}

impl TableRef {
    /// Reference a table by name with the default key column.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            primary_key: default_primary_key(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = key.into();
        self
    }

    /// Build a reference from any table-like value.
    ///
    /// Fails with a precondition error when the value names no table.
    pub fn from_table_like<T: TableLike + ?Sized>(value: &T) -> Result<Self> {
        let name = value.table_name().trim();
        if name.is_empty() {
            return Err(LoadError::precondition(
                "value is not table-like: empty table name",
            ));
        }
        let key = value.primary_key().trim();
        Ok(Self {
            schema: None,
            name: name.to_string(),
            primary_key: if key.is_empty() {
                default_primary_key()
            } else {
                key.to_string()
            },
        })
    }

    /// Resolve schema, bare table name and sequence name.
    ///
    /// Splits on the first `.` only, so `"a.b.c"` is schema `a`, table `b.c`.
    pub fn resolve(&self) -> ResolvedTable {
        let (schema, table) = match self.name.split_once('.') {
            Some((schema, table)) => (schema.to_string(), table.to_string()),
            None => (
                self.schema
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
                self.name.clone(),
            ),
        };
        let sequence = SequenceRef {
            schema: schema.clone(),
            name: format!("{}_{}_seq", table, self.primary_key),
        };
        ResolvedTable {
            schema,
            table,
            primary_key: self.primary_key.clone(),
            sequence,
        }
    }
}

impl From<&str> for TableRef {
    fn from(name: &str) -> Self {
        TableRef::new(name)
    }
}

/// A sequence backing a primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRef {
    pub schema: String,
    pub name: String,
}

impl SequenceRef {
    pub fn qualified(&self) -> Result<String> {
        qualify_pg(&self.schema, &self.name)
    }
}

impl std::fmt::Display for SequenceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// A table reference after resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTable {
    pub schema: String,
    pub table: String,
    pub primary_key: String,
    pub sequence: SequenceRef,
}

impl ResolvedTable {
    /// Quoted `"schema"."table"`.
    pub fn qualified(&self) -> Result<String> {
        qualify_pg(&self.schema, &self.table)
    }

    /// Quoted primary key column.
    pub fn quoted_key(&self) -> Result<String> {
        quote_pg(&self.primary_key)
    }
}

impl std::fmt::Display for ResolvedTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}
