//! Cursor query construction.
//!
//! Three query shapes are produced:
//!
//! ```text
//! SELECT * FROM `c`.`s`.`t`                                  -- full refresh
//! SELECT * FROM `c`.`s`.`t` ORDER BY `f` ASC                 -- first incremental sync
//! SELECT * FROM `c`.`s`.`t` WHERE `f` > <v> ORDER BY `f` ASC -- resumed incremental sync
//! ```
//!
//! The filter is strictly greater-than: a row whose cursor equals the stored
//! value is treated as already synced, so rows written later with exactly
//! that value are missed.

use chrono::SecondsFormat;
use sync_core::{ColumnSchema, CursorValue, MappedType, TableIdentity};

use crate::error::SourceError;

/// The column chosen to bound incremental extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorSpec {
    pub field: String,
}

impl CursorSpec {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    /// Resolve the field against the discovered schema.
    ///
    /// Column names are matched exactly first, then case-insensitively
    /// (the warehouse treats identifiers case-insensitively).
    pub fn resolve(&self, schema: &ColumnSchema) -> Result<CursorColumn, SourceError> {
        let column = schema.get(&self.field).or_else(|| {
            let mut matches = schema
                .columns()
                .iter()
                .filter(|c| c.name.eq_ignore_ascii_case(&self.field));
            match (matches.next(), matches.next()) {
                (Some(only), None) => Some(only),
                _ => None,
            }
        });

        let Some(column) = column else {
            return Err(SourceError::QueryBuild(format!(
                "cursor field '{}' not found; valid cursor fields: [{}]",
                self.field,
                schema.cursor_candidates().join(", ")
            )));
        };

        if !column.mapped_type.is_orderable() {
            return Err(SourceError::QueryBuild(format!(
                "cursor field '{}' has type {} ({}), which cannot be used as a cursor",
                column.name, column.mapped_type, column.remote_type
            )));
        }

        Ok(CursorColumn {
            name: column.name.clone(),
            mapped_type: column.mapped_type,
        })
    }
}

/// A cursor field checked against the schema: it exists and is orderable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorColumn {
    name: String,
    mapped_type: MappedType,
}

impl CursorColumn {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mapped_type(&self) -> MappedType {
        self.mapped_type
    }

    /// Bring a stored cursor value to this column's type.
    pub fn coerce(&self, value: &CursorValue) -> Result<CursorValue, SourceError> {
        value.coerce_to(self.mapped_type).map_err(|e| {
            SourceError::QueryBuild(format!(
                "stored cursor value '{value}' does not fit column '{}' ({}): {e}",
                self.name, self.mapped_type
            ))
        })
    }
}

/// SQL text for one extraction query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryText(String);

impl QueryText {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueryText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Quote an identifier with backticks, doubling embedded backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Render a table identity as a fully qualified, quoted name.
pub fn quote_table(table: &TableIdentity) -> String {
    format!(
        "{}.{}.{}",
        quote_identifier(table.catalog()),
        quote_identifier(table.schema()),
        quote_identifier(table.table())
    )
}

/// Quote a string as a SQL string literal.
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Render a cursor value as a literal of its own type.
pub fn render_literal(value: &CursorValue) -> String {
    match value {
        CursorValue::String(s) => quote_string(s),
        CursorValue::Integer(i) => i.to_string(),
        CursorValue::Number(d) => d.to_string(),
        CursorValue::Timestamp(ts) => format!(
            "TIMESTAMP '{}'",
            ts.to_rfc3339_opts(SecondsFormat::Micros, true)
        ),
    }
}

/// Build the extraction query for `table`.
///
/// `previous` is only honoured together with a cursor column; it is coerced
/// to the column's type and rejected with [`SourceError::QueryBuild`] if it
/// does not fit.
pub fn build_query(
    table: &TableIdentity,
    cursor: Option<&CursorColumn>,
    previous: Option<&CursorValue>,
) -> Result<QueryText, SourceError> {
    let mut sql = format!("SELECT * FROM {}", quote_table(table));

    if let Some(cursor) = cursor {
        let field = quote_identifier(cursor.name());
        if let Some(previous) = previous {
            let literal = render_literal(&cursor.coerce(previous)?);
            sql.push_str(&format!(" WHERE {field} > {literal}"));
        }
        sql.push_str(&format!(" ORDER BY {field} ASC"));
    }

    Ok(QueryText(sql))
}
