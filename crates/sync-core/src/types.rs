//! Semantic type universe for warehouse columns.
//!
//! Every remote column type is folded into one of six [`MappedType`]s. The
//! mapping is total: names the table below does not know become
//! [`MappedType::Unknown`] instead of failing discovery.

use serde::{Deserialize, Serialize};

/// Semantic type of a column, independent of the warehouse's own type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappedType {
    /// Character data (`string`, `varchar(n)`, `char(n)`)
    String,
    /// Whole numbers that fit in 64 bits
    Integer,
    /// Exact or approximate fractional numbers
    Number,
    /// `true` / `false`
    Boolean,
    /// Dates and instants
    Timestamp,
    /// Binary, nested and other types with no scalar ordering
    Unknown,
}

impl MappedType {
    /// Map a remote type name (e.g. `DECIMAL(10,2)`, `array<string>`,
    /// `TIMESTAMP_NTZ`) onto the semantic type universe.
    pub fn from_remote(remote_type: &str) -> Self {
        match base_type_name(remote_type).as_str() {
            "string" | "varchar" | "char" | "text" => MappedType::String,
            "tinyint" | "byte" | "smallint" | "short" | "int" | "integer" | "bigint" | "long" => {
                MappedType::Integer
            }
            "float" | "real" | "double" | "decimal" | "dec" | "numeric" => MappedType::Number,
            "boolean" | "bool" => MappedType::Boolean,
            "timestamp" | "timestamp_ntz" | "timestamp_ltz" | "date" | "datetime" => {
                MappedType::Timestamp
            }
            _ => MappedType::Unknown,
        }
    }

    /// Whether columns of this type can bound an incremental sync.
    ///
    /// Booleans only have two values and unknown types have no natural
    /// ordering, so neither is accepted as a cursor.
    pub fn is_orderable(&self) -> bool {
        matches!(
            self,
            MappedType::String | MappedType::Integer | MappedType::Number | MappedType::Timestamp
        )
    }

    /// JSON-schema `type` keyword for columns of this type.
    ///
    /// Returns `None` for [`MappedType::Unknown`], which is advertised untyped.
    pub fn json_type(&self) -> Option<&'static str> {
        match self {
            MappedType::String | MappedType::Timestamp => Some("string"),
            MappedType::Integer => Some("integer"),
            MappedType::Number => Some("number"),
            MappedType::Boolean => Some("boolean"),
            MappedType::Unknown => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MappedType::String => "string",
            MappedType::Integer => "integer",
            MappedType::Number => "number",
            MappedType::Boolean => "boolean",
            MappedType::Timestamp => "timestamp",
            MappedType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for MappedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercase the type name and strip parameters: `DECIMAL(10,2)` -> `decimal`,
/// `ARRAY<INT>` -> `array`, `varchar(255) not null` -> `varchar`.
fn base_type_name(remote_type: &str) -> String {
    let trimmed = remote_type.trim();
    let end = trimmed
        .find(|c: char| c == '(' || c == '<' || c.is_whitespace())
        .unwrap_or(trimmed.len());
    trimmed[..end].to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maps_known_remote_types() {
        assert_eq!(MappedType::from_remote("string"), MappedType::String);
        assert_eq!(MappedType::from_remote("VARCHAR(255)"), MappedType::String);
        assert_eq!(MappedType::from_remote("bigint"), MappedType::Integer);
        assert_eq!(MappedType::from_remote("INT"), MappedType::Integer);
        assert_eq!(MappedType::from_remote("decimal(10,2)"), MappedType::Number);
        assert_eq!(MappedType::from_remote("double"), MappedType::Number);
        assert_eq!(MappedType::from_remote("boolean"), MappedType::Boolean);
        assert_eq!(MappedType::from_remote("TIMESTAMP"), MappedType::Timestamp);
        assert_eq!(MappedType::from_remote("timestamp_ntz"), MappedType::Timestamp);
        assert_eq!(MappedType::from_remote("date"), MappedType::Timestamp);
    }

    #[test]
    fn test_unrecognized_types_are_unknown() {
        assert_eq!(MappedType::from_remote("binary"), MappedType::Unknown);
        assert_eq!(MappedType::from_remote("array<string>"), MappedType::Unknown);
        assert_eq!(
            MappedType::from_remote("struct<a:int,b:string>"),
            MappedType::Unknown
        );
        assert_eq!(MappedType::from_remote("map<string,int>"), MappedType::Unknown);
        assert_eq!(MappedType::from_remote("variant"), MappedType::Unknown);
        assert_eq!(MappedType::from_remote(""), MappedType::Unknown);
    }

    #[test]
    fn test_orderable_types() {
        assert!(MappedType::String.is_orderable());
        assert!(MappedType::Integer.is_orderable());
        assert!(MappedType::Number.is_orderable());
        assert!(MappedType::Timestamp.is_orderable());
        assert!(!MappedType::Boolean.is_orderable());
        assert!(!MappedType::Unknown.is_orderable());
    }

    #[test]
    fn test_mapped_type_serialization() {
        let json = serde_json::to_string(&MappedType::Timestamp).unwrap();
        assert_eq!(json, "\"timestamp\"");
        let parsed: MappedType = serde_json::from_str("\"integer\"").unwrap();
        assert_eq!(parsed, MappedType::Integer);
    }
}
