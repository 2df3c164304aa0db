//! Core types shared by every loader component.
//!
//! - [`identifier`]: identifier validation and quoting
//! - [`table`]: table references and their resolution into schema, table and sequence
//! - [`value`]: SQL values rendered as literals for batch inserts

pub mod identifier;
pub mod table;
pub mod value;

pub use table::{ResolvedTable, SequenceRef, TableLike, TableRef};
pub use value::{SqlNullType, SqlValue};
