//! Decoded scalar values and orderable cursor values.
//!
//! The warehouse returns every scalar as text (or null); [`Value::decode`]
//! turns that text into a typed value according to the column's
//! [`MappedType`]. [`CursorValue`] is the subset of values that can bound an
//! incremental sync, with a single comparator dispatched on the variant.

use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::MappedType;

/// Errors produced while decoding or comparing values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    /// Raw text could not be decoded as the column's type.
    #[error("cannot decode '{raw}' as {expected}")]
    Malformed { raw: String, expected: MappedType },

    /// Two cursor values of different types were compared.
    #[error("cannot compare a {left} cursor value with a {right} cursor value")]
    Incomparable { left: MappedType, right: MappedType },

    /// The type has no ordering usable for a cursor.
    #[error("{0} values cannot be used as a cursor")]
    NotOrderable(MappedType),
}

/// A decoded scalar from a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Integer(i64),
    Number(Decimal),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    /// Nested data (arrays, maps, structs) delivered as embedded JSON
    Json(serde_json::Value),
}

impl Value {
    /// Decode the warehouse's textual representation of a scalar.
    ///
    /// `None` is SQL `NULL` and decodes to [`Value::Null`] for every type.
    pub fn decode(raw: Option<&str>, ty: MappedType) -> Result<Self, ValueError> {
        let Some(raw) = raw else {
            return Ok(Value::Null);
        };
        let malformed = || ValueError::Malformed {
            raw: raw.to_string(),
            expected: ty,
        };

        match ty {
            MappedType::String => Ok(Value::String(raw.to_string())),
            MappedType::Integer => raw
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| malformed()),
            MappedType::Number => parse_decimal(raw).map(Value::Number).ok_or_else(malformed),
            MappedType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Boolean(true)),
                "false" => Ok(Value::Boolean(false)),
                _ => Err(malformed()),
            },
            MappedType::Timestamp => parse_timestamp(raw)
                .map(Value::Timestamp)
                .ok_or_else(malformed),
            MappedType::Unknown => Ok(match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(v @ (serde_json::Value::Array(_) | serde_json::Value::Object(_))) => {
                    Value::Json(v)
                }
                _ => Value::String(raw.to_string()),
            }),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The cursor view of this value, if it has an orderable type.
    pub fn to_cursor(&self) -> Option<CursorValue> {
        match self {
            Value::String(s) => Some(CursorValue::String(s.clone())),
            Value::Integer(i) => Some(CursorValue::Integer(*i)),
            Value::Number(d) => Some(CursorValue::Number(*d)),
            Value::Timestamp(ts) => Some(CursorValue::Timestamp(*ts)),
            Value::Null | Value::Boolean(_) | Value::Json(_) => None,
        }
    }

    /// Render as JSON for record output.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Number(d) => d
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(d.to_string())),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Timestamp(ts) => serde_json::Value::String(format_timestamp(ts)),
            Value::Json(v) => v.clone(),
        }
    }
}

/// An orderable scalar used to bound incremental extraction.
///
/// Serialized with an explicit type tag so a persisted state can be read
/// back without guessing:
///
/// ```json
/// {"type": "timestamp", "value": "2024-01-02T00:00:00Z"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CursorValue {
    String(String),
    Integer(i64),
    Number(Decimal),
    Timestamp(DateTime<Utc>),
}

impl CursorValue {
    /// Parse the textual form of a cursor value as the given type.
    pub fn parse(text: &str, ty: MappedType) -> Result<Self, ValueError> {
        if !ty.is_orderable() {
            return Err(ValueError::NotOrderable(ty));
        }
        Value::decode(Some(text), ty)?
            .to_cursor()
            .ok_or(ValueError::NotOrderable(ty))
    }

    pub fn mapped_type(&self) -> MappedType {
        match self {
            CursorValue::String(_) => MappedType::String,
            CursorValue::Integer(_) => MappedType::Integer,
            CursorValue::Number(_) => MappedType::Number,
            CursorValue::Timestamp(_) => MappedType::Timestamp,
        }
    }

    /// Compare two cursor values using their type's natural ordering:
    /// lexicographic for strings, numeric for integers and numbers,
    /// chronological for timestamps.
    ///
    /// Values of different types are never coerced here.
    pub fn compare(&self, other: &CursorValue) -> Result<Ordering, ValueError> {
        match (self, other) {
            (CursorValue::String(a), CursorValue::String(b)) => Ok(a.cmp(b)),
            (CursorValue::Integer(a), CursorValue::Integer(b)) => Ok(a.cmp(b)),
            (CursorValue::Number(a), CursorValue::Number(b)) => Ok(a.cmp(b)),
            (CursorValue::Timestamp(a), CursorValue::Timestamp(b)) => Ok(a.cmp(b)),
            (left, right) => Err(ValueError::Incomparable {
                left: left.mapped_type(),
                right: right.mapped_type(),
            }),
        }
    }

    /// The larger of two same-typed cursor values.
    pub fn max(self, other: CursorValue) -> Result<CursorValue, ValueError> {
        match self.compare(&other)? {
            Ordering::Less => Ok(other),
            Ordering::Equal | Ordering::Greater => Ok(self),
        }
    }

    /// Re-interpret this value as `ty`, re-parsing its textual form when the
    /// stored type differs from the column type.
    pub fn coerce_to(&self, ty: MappedType) -> Result<CursorValue, ValueError> {
        if self.mapped_type() == ty {
            return Ok(self.clone());
        }
        CursorValue::parse(&self.to_string(), ty)
    }
}

impl std::fmt::Display for CursorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CursorValue::String(s) => f.write_str(s),
            CursorValue::Integer(i) => write!(f, "{i}"),
            CursorValue::Number(d) => write!(f, "{d}"),
            CursorValue::Timestamp(ts) => f.write_str(&format_timestamp(ts)),
        }
    }
}

/// A decoded result row: column name to value, in remote column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push((name.into(), value));
    }

    /// Look up a column's value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Render as a JSON object for record output.
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// A bounded chunk of rows, in the order the warehouse returned them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch {
    rows: Vec<Row>,
}

impl RowBatch {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

impl<'a> IntoIterator for &'a RowBatch {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Format an instant as RFC 3339 in UTC (`2024-01-02T00:00:00Z`), keeping
/// sub-second digits only when present.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse the timestamp shapes the warehouse emits.
///
/// Accepts RFC 3339, zone-less ISO date-times (read as UTC) and bare dates
/// (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let s = raw.trim();
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}
