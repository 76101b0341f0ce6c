//! Table identity and discovered column schema.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::MappedType;

/// Errors raised while building schema types.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("table identity field '{0}' must not be empty")]
    EmptyIdentifier(&'static str),

    #[error("duplicate column name '{0}'")]
    DuplicateColumn(String),
}

/// The `catalog.schema.table` triple naming the relation to sync.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableIdentity {
    catalog: String,
    schema: String,
    table: String,
}

impl TableIdentity {
    pub fn new(
        catalog: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Result<Self, SchemaError> {
        let identity = Self {
            catalog: catalog.into(),
            schema: schema.into(),
            table: table.into(),
        };
        if identity.catalog.trim().is_empty() {
            return Err(SchemaError::EmptyIdentifier("catalog"));
        }
        if identity.schema.trim().is_empty() {
            return Err(SchemaError::EmptyIdentifier("schema"));
        }
        if identity.table.trim().is_empty() {
            return Err(SchemaError::EmptyIdentifier("table"));
        }
        Ok(identity)
    }

    pub fn catalog(&self) -> &str {
        &self.catalog
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Stream name advertised to the caller: `catalog_schema_table`.
    pub fn stream_name(&self) -> String {
        format!("{}_{}_{}", self.catalog, self.schema, self.table)
    }
}

impl std::fmt::Display for TableIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.catalog, self.schema, self.table)
    }
}

/// One column of the discovered relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    /// Type name as reported by the warehouse, e.g. `decimal(10,2)`
    pub remote_type: String,
    pub mapped_type: MappedType,
    /// `None` when the metadata source does not report nullability
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
}

impl ColumnDef {
    /// Build a column, deriving the mapped type from the remote type name.
    pub fn new(name: impl Into<String>, remote_type: impl Into<String>) -> Self {
        let remote_type = remote_type.into();
        Self {
            name: name.into(),
            mapped_type: MappedType::from_remote(&remote_type),
            remote_type,
            nullable: None,
        }
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }
}

/// Ordered columns of a relation.
///
/// Column order matches the remote column order and is used for positional
/// row decoding; names are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    columns: Vec<ColumnDef>,
}

impl ColumnSchema {
    pub fn new(columns: Vec<ColumnDef>) -> Result<Self, SchemaError> {
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaError::DuplicateColumn(column.name.clone()));
            }
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Columns that may serve as a cursor field.
    pub fn cursor_candidates(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.mapped_type.is_orderable())
            .map(|c| c.name.as_str())
            .collect()
    }

    /// JSON schema for the records this relation produces.
    ///
    /// Every property is nullable; timestamps are strings in `date-time`
    /// format and unknown types are left untyped.
    pub fn to_json_schema(&self) -> serde_json::Value {
        let properties = self
            .columns
            .iter()
            .map(|column| {
                let property = match column.mapped_type {
                    MappedType::Timestamp => serde_json::json!({
                        "type": ["string", "null"],
                        "format": "date-time",
                    }),
                    other => match other.json_type() {
                        Some(json_type) => serde_json::json!({ "type": [json_type, "null"] }),
                        None => serde_json::json!({}),
                    },
                };
                (column.name.clone(), property)
            })
            .collect::<serde_json::Map<_, _>>();

        serde_json::json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "properties": properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> ColumnSchema {
        ColumnSchema::new(vec![
            ColumnDef::new("id", "bigint"),
            ColumnDef::new("name", "string"),
            ColumnDef::new("active", "boolean"),
            ColumnDef::new("updated_at", "timestamp"),
            ColumnDef::new("tags", "array<string>"),
        ])
        .unwrap()
    }

    #[test]
    fn test_table_identity_rejects_empty_parts() {
        assert_eq!(
            TableIdentity::new("", "s", "t").unwrap_err(),
            SchemaError::EmptyIdentifier("catalog")
        );
        assert_eq!(
            TableIdentity::new("c", " ", "t").unwrap_err(),
            SchemaError::EmptyIdentifier("schema")
        );
        assert_eq!(
            TableIdentity::new("c", "s", "").unwrap_err(),
            SchemaError::EmptyIdentifier("table")
        );
    }

    #[test]
    fn test_table_identity_names() {
        let identity = TableIdentity::new("main", "sales", "orders").unwrap();
        assert_eq!(identity.to_string(), "main.sales.orders");
        assert_eq!(identity.stream_name(), "main_sales_orders");
    }

    #[test]
    fn test_column_schema_rejects_duplicates() {
        let result = ColumnSchema::new(vec![
            ColumnDef::new("id", "int"),
            ColumnDef::new("id", "string"),
        ]);
        assert_eq!(
            result.unwrap_err(),
            SchemaError::DuplicateColumn("id".to_string())
        );
    }

    #[test]
    fn test_column_schema_lookup() {
        let schema = sample_schema();
        assert_eq!(schema.len(), 5);
        assert_eq!(schema.position("updated_at"), Some(3));
        assert_eq!(
            schema.get("tags").map(|c| c.mapped_type),
            Some(MappedType::Unknown)
        );
        assert_eq!(
            schema.names().collect::<Vec<_>>(),
            vec!["id", "name", "active", "updated_at", "tags"]
        );
    }

    #[test]
    fn test_cursor_candidates_exclude_boolean_and_unknown() {
        assert_eq!(
            sample_schema().cursor_candidates(),
            vec!["id", "name", "updated_at"]
        );
    }

    #[test]
    fn test_json_schema() {
        let json = sample_schema().to_json_schema();
        assert_eq!(json["type"], "object");
        assert_eq!(
            json["properties"]["id"],
            serde_json::json!({"type": ["integer", "null"]})
        );
        assert_eq!(
            json["properties"]["updated_at"],
            serde_json::json!({"type": ["string", "null"], "format": "date-time"})
        );
        assert_eq!(json["properties"]["tags"], serde_json::json!({}));
    }
}
