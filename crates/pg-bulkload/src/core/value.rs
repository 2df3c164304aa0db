//! SQL values for literal batch inserts.
//!
//! Rows handed to the batch encoder are made of [`SqlValue`]s. Each value
//! knows how to render itself as a PostgreSQL literal, so a batch can be sent
//! as plain text without bind parameters.

use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Type hint carried by NULL values.
///
/// NULL renders the same way regardless of type; the hint is kept so callers
/// building rows from typed sources do not lose column type information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlNullType {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    String,
    Bytes,
    Uuid,
    Decimal,
    DateTime,
    DateTimeOffset,
    Date,
    Time,
}

/// A single SQL value.
///
/// Uses `Cow` for string and byte data so rows can borrow from caller
/// buffers. Use [`SqlValue::into_owned`] to detach from the source.
///
/// ```rust
/// use std::borrow::Cow;
/// use pg_bulkload::core::SqlValue;
///
/// let borrowed: SqlValue<'_> = SqlValue::Text(Cow::Borrowed("o'neil"));
/// assert_eq!(borrowed.to_literal(), "'o''neil'");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue<'a> {
    /// NULL with a type hint.
    Null(SqlNullType),
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Text(Cow<'a, str>),
    Bytes(Cow<'a, [u8]>),
    Uuid(Uuid),
    Decimal(Decimal),
    /// Timestamp without time zone.
    DateTime(NaiveDateTime),
    /// Timestamp with time zone offset.
    DateTimeOffset(DateTime<FixedOffset>),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl<'a> SqlValue<'a> {
    /// Convert to a fully owned value with `'static` lifetime.
    #[must_use]
    pub fn into_owned(self) -> SqlValue<'static> {
        match self {
            SqlValue::Null(t) => SqlValue::Null(t),
            SqlValue::Bool(v) => SqlValue::Bool(v),
            SqlValue::I16(v) => SqlValue::I16(v),
            SqlValue::I32(v) => SqlValue::I32(v),
            SqlValue::I64(v) => SqlValue::I64(v),
            SqlValue::F32(v) => SqlValue::F32(v),
            SqlValue::F64(v) => SqlValue::F64(v),
            SqlValue::Text(v) => SqlValue::Text(Cow::Owned(v.into_owned())),
            SqlValue::Bytes(v) => SqlValue::Bytes(Cow::Owned(v.into_owned())),
            SqlValue::Uuid(v) => SqlValue::Uuid(v),
            SqlValue::Decimal(v) => SqlValue::Decimal(v),
            SqlValue::DateTime(v) => SqlValue::DateTime(v),
            SqlValue::DateTimeOffset(v) => SqlValue::DateTimeOffset(v),
            SqlValue::Date(v) => SqlValue::Date(v),
            SqlValue::Time(v) => SqlValue::Time(v),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Render this value as a PostgreSQL literal.
    ///
    /// Temporal values use typed literals (`TIMESTAMP '...'`), text doubles
    /// embedded single quotes, and non-finite floats are quoted and cast to
    /// `float8` because `NaN` and `inf` are not valid numeric tokens.
    #[must_use]
    pub fn to_literal(&self) -> String {
        match self {
            SqlValue::Null(_) => "NULL".to_string(),
            SqlValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            SqlValue::I16(n) => n.to_string(),
            SqlValue::I32(n) => n.to_string(),
            SqlValue::I64(n) => n.to_string(),
            SqlValue::F32(n) => float_literal(f64::from(*n)),
            SqlValue::F64(n) => float_literal(*n),
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            SqlValue::Bytes(b) => format!("'\\x{}'::bytea", hex::encode(b)),
            SqlValue::Uuid(u) => format!("'{}'::uuid", u),
            SqlValue::Decimal(d) => d.to_string(),
            SqlValue::DateTime(dt) => {
                format!("TIMESTAMP '{}'", dt.format("%Y-%m-%d %H:%M:%S%.f"))
            }
            SqlValue::DateTimeOffset(dt) => format!(
                "TIMESTAMPTZ '{}'",
                dt.format("%Y-%m-%d %H:%M:%S%.f%:z")
            ),
            SqlValue::Date(d) => format!("DATE '{}'", d.format("%Y-%m-%d")),
            SqlValue::Time(t) => format!("TIME '{}'", t.format("%H:%M:%S%.f")),
        }
    }
}

fn float_literal(n: f64) -> String {
    if n.is_nan() {
        "'NaN'::float8".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "'Infinity'::float8".to_string()
        } else {
            "'-Infinity'::float8".to_string()
        }
    } else {
        n.to_string()
    }
}

impl From<bool> for SqlValue<'static> {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i16> for SqlValue<'static> {
    fn from(v: i16) -> Self {
        SqlValue::I16(v)
    }
}

impl From<i32> for SqlValue<'static> {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue<'static> {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<f64> for SqlValue<'static> {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<String> for SqlValue<'static> {
    fn from(v: String) -> Self {
        SqlValue::Text(Cow::Owned(v))
    }
}

impl<'a> From<&'a str> for SqlValue<'a> {
    fn from(v: &'a str) -> Self {
        SqlValue::Text(Cow::Borrowed(v))
    }
}

impl From<Vec<u8>> for SqlValue<'static> {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(Cow::Owned(v))
    }
}

impl From<Uuid> for SqlValue<'static> {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

impl From<Decimal> for SqlValue<'static> {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<NaiveDateTime> for SqlValue<'static> {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl From<DateTime<FixedOffset>> for SqlValue<'static> {
    fn from(v: DateTime<FixedOffset>) -> Self {
        SqlValue::DateTimeOffset(v)
    }
}

impl From<NaiveDate> for SqlValue<'static> {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveTime> for SqlValue<'static> {
    fn from(v: NaiveTime) -> Self {
        SqlValue::Time(v)
    }
}

impl<T> From<Option<T>> for SqlValue<'static>
where
    T: Into<SqlValue<'static>>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => SqlValue::Null(SqlNullType::String),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_sql_value_into_owned() {
        let borrowed: SqlValue<'_> = SqlValue::Text(Cow::Borrowed("hello"));
        let owned: SqlValue<'static> = borrowed.into_owned();
        assert_eq!(owned, SqlValue::Text(Cow::Owned("hello".to_string())));
    }

    #[test]
    fn test_sql_value_is_null() {
        assert!(SqlValue::<'static>::Null(SqlNullType::String).is_null());
        assert!(!SqlValue::I32(42).is_null());
    }

    #[test]
    fn test_scalar_literals() {
        assert_eq!(SqlValue::Null(SqlNullType::I32).to_literal(), "NULL");
        assert_eq!(SqlValue::Bool(true).to_literal(), "TRUE");
        assert_eq!(SqlValue::Bool(false).to_literal(), "FALSE");
        assert_eq!(SqlValue::I64(-7).to_literal(), "-7");
        assert_eq!(SqlValue::F64(1.5).to_literal(), "1.5");
        assert_eq!(
            SqlValue::Decimal(Decimal::from_str("12.340").unwrap()).to_literal(),
            "12.340"
        );
    }

    #[test]
    fn test_text_literal_doubles_quotes() {
        let v: SqlValue = "it's".into();
        assert_eq!(v.to_literal(), "'it''s'");

        let v: SqlValue = "'; DROP TABLE users; --".into();
        assert_eq!(v.to_literal(), "'''; DROP TABLE users; --'");
    }

    #[test]
    fn test_non_finite_floats_are_quoted() {
        assert_eq!(SqlValue::F64(f64::NAN).to_literal(), "'NaN'::float8");
        assert_eq!(
            SqlValue::F64(f64::INFINITY).to_literal(),
            "'Infinity'::float8"
        );
        assert_eq!(
            SqlValue::F32(f32::NEG_INFINITY).to_literal(),
            "'-Infinity'::float8"
        );
    }

    #[test]
    fn test_bytes_and_uuid_literals() {
        let v: SqlValue = vec![0xde, 0xad, 0xbe, 0xef].into();
        assert_eq!(v.to_literal(), "'\\xdeadbeef'::bytea");

        let id = Uuid::nil();
        assert_eq!(
            SqlValue::Uuid(id).to_literal(),
            "'00000000-0000-0000-0000-000000000000'::uuid"
        );
    }

    #[test]
    fn test_temporal_literals_are_typed() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(13, 5, 0)
            .unwrap();
        assert_eq!(
            SqlValue::DateTime(ts).to_literal(),
            "TIMESTAMP '2024-03-09 13:05:00'"
        );

        let tz = DateTime::parse_from_rfc3339("2024-03-09T13:05:00.250+02:00").unwrap();
        assert_eq!(
            SqlValue::DateTimeOffset(tz).to_literal(),
            "TIMESTAMPTZ '2024-03-09 13:05:00.250+02:00'"
        );

        let d = NaiveDate::from_ymd_opt(1999, 12, 31).unwrap();
        assert_eq!(SqlValue::Date(d).to_literal(), "DATE '1999-12-31'");

        let t = NaiveTime::from_hms_opt(8, 30, 15).unwrap();
        assert_eq!(SqlValue::Time(t).to_literal(), "TIME '08:30:15'");
    }

    #[test]
    fn test_from_option() {
        let v: SqlValue = Some(5i32).into();
        assert_eq!(v, SqlValue::I32(5));

        let v: SqlValue = Option::<i32>::None.into();
        assert!(v.is_null());
    }
}
