//! Schema discovery for the table being synced.
//!
//! Unity Catalog relations are resolved through
//! `system.information_schema.columns`, which reports nullability and lets
//! ambiguous names be detected. The legacy `hive_metastore` catalog is not
//! covered there and falls back to `DESCRIBE TABLE`.

use std::collections::BTreeSet;

use sync_core::{ColumnDef, ColumnSchema, MappedType, SchemaError, TableIdentity};
use tracing::{debug, info};

use crate::connection::{ConnectionManager, ManagedConnection};
use crate::error::SourceError;
use crate::query::{quote_string, quote_table};
use crate::statement::RawRow;

pub const HIVE_METASTORE: &str = "hive_metastore";

/// Error markers the warehouse uses for relations that do not resolve.
const NOT_FOUND_MARKERS: [&str; 3] = [
    "TABLE_OR_VIEW_NOT_FOUND",
    "SCHEMA_NOT_FOUND",
    "CATALOG_NOT_FOUND",
];

/// Metadata query listing the columns of every relation matching `table`
/// case-insensitively, in remote column order.
pub fn information_schema_query(table: &TableIdentity) -> String {
    format!(
        "SELECT table_catalog, table_schema, table_name, column_name, full_data_type, is_nullable \
         FROM system.information_schema.columns \
         WHERE lower(table_catalog) = lower({}) \
         AND lower(table_schema) = lower({}) \
         AND lower(table_name) = lower({}) \
         ORDER BY table_catalog, table_schema, table_name, ordinal_position",
        quote_string(table.catalog()),
        quote_string(table.schema()),
        quote_string(table.table()),
    )
}

pub fn describe_query(table: &TableIdentity) -> String {
    format!("DESCRIBE TABLE {}", quote_table(table))
}

/// Discover the columns of `table`.
///
/// Unrecognised remote types map to [`MappedType::Unknown`]; they are kept in
/// the schema but cannot serve as a cursor.
pub async fn discover(
    table: &TableIdentity,
    conn: &ManagedConnection,
) -> Result<ColumnSchema, SourceError> {
    let schema = if table.catalog().eq_ignore_ascii_case(HIVE_METASTORE) {
        discover_with_describe(table, conn).await?
    } else {
        discover_with_information_schema(table, conn).await?
    };

    for column in schema.columns() {
        if column.mapped_type == MappedType::Unknown {
            debug!(
                "Column '{}' of {table} has unrecognised type '{}'",
                column.name, column.remote_type
            );
        }
    }
    info!("Discovered {} columns for {table}", schema.len());
    Ok(schema)
}

/// Acquire a session, discover `table`, and release the session.
pub async fn discover_table(
    manager: &ConnectionManager,
    table: &TableIdentity,
) -> Result<ColumnSchema, SourceError> {
    let conn = manager.acquire().await?;
    let result = discover(table, &conn).await;
    conn.close().await;
    result
}

async fn discover_with_information_schema(
    table: &TableIdentity,
    conn: &ManagedConnection,
) -> Result<ColumnSchema, SourceError> {
    let rows = conn.query_all(&information_schema_query(table)).await?;
    if rows.is_empty() {
        return Err(SourceError::SchemaNotFound(table.clone()));
    }

    let mut relations = BTreeSet::new();
    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let relation = format!(
            "{}.{}.{}",
            cell(row, 0, "table_catalog")?,
            cell(row, 1, "table_schema")?,
            cell(row, 2, "table_name")?
        );
        relations.insert(relation);

        let column = ColumnDef::new(cell(row, 3, "column_name")?, cell(row, 4, "full_data_type")?);
        let column = match row.get(5).and_then(|v| v.as_deref()) {
            Some(nullable) => column.with_nullable(nullable.eq_ignore_ascii_case("YES")),
            None => column,
        };
        columns.push(column);
    }

    if relations.len() > 1 {
        return Err(SourceError::AmbiguousSchema {
            table: table.clone(),
            reason: format!(
                "matches {} relations: {}",
                relations.len(),
                relations.into_iter().collect::<Vec<_>>().join(", ")
            ),
        });
    }

    build_schema(table, columns)
}

async fn discover_with_describe(
    table: &TableIdentity,
    conn: &ManagedConnection,
) -> Result<ColumnSchema, SourceError> {
    let rows = match conn.query_all(&describe_query(table)).await {
        Ok(rows) => rows,
        Err(SourceError::Statement { code, message, .. })
            if NOT_FOUND_MARKERS
                .iter()
                .any(|m| code.contains(m) || message.contains(m)) =>
        {
            debug!("DESCRIBE TABLE {table} failed: [{code}] {message}");
            return Err(SourceError::SchemaNotFound(table.clone()));
        }
        Err(e) => return Err(e),
    };

    schema_from_describe(table, &rows)
}

fn schema_from_describe(
    table: &TableIdentity,
    rows: &[RawRow],
) -> Result<ColumnSchema, SourceError> {
    // Column rows come first; partition and detail sections start after a
    // blank or '#'-prefixed row.
    let mut columns = Vec::new();
    for row in rows {
        let name = row.first().and_then(|v| v.as_deref()).unwrap_or("").trim();
        if name.is_empty() || name.starts_with('#') {
            break;
        }
        columns.push(ColumnDef::new(name, cell(row, 1, "data_type")?.trim()));
    }

    if columns.is_empty() {
        return Err(SourceError::SchemaNotFound(table.clone()));
    }
    build_schema(table, columns)
}

fn build_schema(table: &TableIdentity, columns: Vec<ColumnDef>) -> Result<ColumnSchema, SourceError> {
    ColumnSchema::new(columns).map_err(|e| match e {
        SchemaError::DuplicateColumn(name) => SourceError::AmbiguousSchema {
            table: table.clone(),
            reason: format!("column '{name}' is reported more than once"),
        },
        other => SourceError::Connection(other.to_string()),
    })
}

fn cell<'a>(row: &'a RawRow, index: usize, name: &str) -> Result<&'a str, SourceError> {
    row.get(index)
        .and_then(|v| v.as_deref())
        .ok_or_else(|| {
            SourceError::Connection(format!(
                "metadata row is missing '{name}' (column {index}): {row:?}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_information_schema_query_quotes_identity() {
        let table = TableIdentity::new("main", "o'brien", "orders").unwrap();
        let sql = information_schema_query(&table);
        assert!(sql.contains("FROM system.information_schema.columns"));
        assert!(sql.contains(r"lower(table_schema) = lower('o\'brien')"));
        assert!(sql.ends_with("ORDER BY table_catalog, table_schema, table_name, ordinal_position"));
    }

    #[test]
    fn test_describe_query() {
        let table = TableIdentity::new("hive_metastore", "default", "events").unwrap();
        assert_eq!(
            describe_query(&table),
            "DESCRIBE TABLE `hive_metastore`.`default`.`events`"
        );
    }

    fn describe_row(name: &str, data_type: &str) -> RawRow {
        vec![Some(name.to_string()), Some(data_type.to_string()), None]
    }

    #[test]
    fn test_describe_stops_at_section_marker() {
        let table = TableIdentity::new("hive_metastore", "default", "events").unwrap();
        let rows = vec![
            describe_row("id", "bigint"),
            describe_row("day", "date"),
            describe_row("", ""),
            describe_row("# Partition Information", ""),
            describe_row("day", "date"),
        ];
        let schema = schema_from_describe(&table, &rows).unwrap();
        assert_eq!(schema.len(), 2);
    }

    #[test]
    fn test_describe_without_columns_is_not_found() {
        let table = TableIdentity::new("hive_metastore", "default", "events").unwrap();
        for rows in [
            vec![],
            vec![describe_row("", "")],
            vec![describe_row("# Detailed Table Information", ""), describe_row("id", "int")],
            vec![vec![None, Some("int".to_string())]],
        ] {
            let err = schema_from_describe(&table, &rows).unwrap_err();
            assert!(matches!(err, SourceError::SchemaNotFound(_)), "{err}");
        }
    }
}
