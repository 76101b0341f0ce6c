//! Batched, forward-only reading of a query result.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;

use futures::Stream;
use sync_core::{ColumnSchema, Row, RowBatch, Value};

use crate::connection::{ManagedConnection, ManagedCursor};
use crate::error::SourceError;
use crate::query::QueryText;
use crate::statement::RawRow;

/// Execute `query` and return a reader over its result in batches of at most
/// `batch_size` rows.
///
/// Rows are decoded positionally against `schema`, which must list the
/// relation's columns in remote order.
pub async fn read(
    conn: &ManagedConnection,
    query: &QueryText,
    batch_size: NonZeroUsize,
    schema: Arc<ColumnSchema>,
) -> Result<BatchReader, SourceError> {
    let cursor = conn.execute(query.as_str()).await?;
    BatchReader::new(cursor, schema, batch_size)
}

/// Yields [`RowBatch`]es in the order the warehouse returns rows.
///
/// The reader is not restartable: once it returns `None` or an error, a new
/// query is needed to read again.
pub struct BatchReader {
    cursor: ManagedCursor,
    schema: Arc<ColumnSchema>,
    batch_size: usize,
    buffer: VecDeque<RawRow>,
    exhausted: bool,
    failed: bool,
}

impl BatchReader {
    pub fn new(
        cursor: ManagedCursor,
        schema: Arc<ColumnSchema>,
        batch_size: NonZeroUsize,
    ) -> Result<Self, SourceError> {
        let result_width = cursor.columns().len();
        if result_width != 0 && result_width != schema.len() {
            return Err(SourceError::RowDecode {
                row: 0,
                reason: format!(
                    "result has {result_width} columns but the discovered schema has {}",
                    schema.len()
                ),
            });
        }

        Ok(Self {
            cursor,
            schema,
            batch_size: batch_size.get(),
            buffer: VecDeque::new(),
            exhausted: false,
            failed: false,
        })
    }

    /// Next batch, or `None` when the result is exhausted.
    ///
    /// A row that fails to decode fails the whole batch; no part of it is
    /// returned.
    pub async fn next_batch(&mut self) -> Result<Option<RowBatch>, SourceError> {
        if self.failed {
            return Ok(None);
        }

        while self.buffer.len() < self.batch_size && !self.exhausted {
            match self.cursor.next_chunk().await {
                Ok(Some(chunk)) => self.buffer.extend(chunk),
                Ok(None) => self.exhausted = true,
                Err(e) => {
                    self.failed = true;
                    return Err(e);
                }
            }
        }

        if self.buffer.is_empty() {
            return Ok(None);
        }

        let take = self.batch_size.min(self.buffer.len());
        let raw: Vec<RawRow> = self.buffer.drain(..take).collect();
        match decode_batch(&self.schema, raw) {
            Ok(batch) => Ok(Some(batch)),
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    /// Adapt the reader into a stream of batches that ends after the first
    /// error.
    pub fn into_stream(self) -> impl Stream<Item = Result<RowBatch, SourceError>> + Send {
        futures::stream::try_unfold(self, |mut reader| async move {
            Ok(reader.next_batch().await?.map(|batch| (batch, reader)))
        })
    }
}

/// Decode raw rows against the schema, failing on the first bad value.
pub fn decode_batch(schema: &ColumnSchema, raw: Vec<RawRow>) -> Result<RowBatch, SourceError> {
    let columns = schema.columns();
    let mut rows = Vec::with_capacity(raw.len());

    for (index, values) in raw.into_iter().enumerate() {
        if values.len() != columns.len() {
            return Err(SourceError::RowDecode {
                row: index,
                reason: format!(
                    "expected {} values, found {}",
                    columns.len(),
                    values.len()
                ),
            });
        }

        let mut row = Row::with_capacity(columns.len());
        for (column, raw_value) in columns.iter().zip(values) {
            let value = Value::decode(raw_value.as_deref(), column.mapped_type).map_err(|e| {
                SourceError::RowDecode {
                    row: index,
                    reason: format!("column '{}': {e}", column.name),
                }
            })?;
            row.push(column.name.clone(), value);
        }
        rows.push(row);
    }

    Ok(RowBatch::new(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::ColumnDef;

    fn schema() -> ColumnSchema {
        ColumnSchema::new(vec![
            ColumnDef::new("id", "int"),
            ColumnDef::new("price", "double"),
            ColumnDef::new("seen_at", "timestamp"),
        ])
        .unwrap()
    }

    fn raw(values: &[Option<&str>]) -> RawRow {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn test_decode_batch_keeps_order_and_nulls() {
        let batch = decode_batch(
            &schema(),
            vec![
                raw(&[Some("1"), Some("9.5"), Some("2024-01-02T00:00:00Z")]),
                raw(&[Some("2"), None, None]),
            ],
        )
        .unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.rows()[0].get("id"), Some(&Value::Integer(1)));
        assert!(batch.rows()[1].get("price").unwrap().is_null());
    }

    #[test]
    fn test_decode_failure_names_row_and_column() {
        let err = decode_batch(
            &schema(),
            vec![
                raw(&[Some("1"), Some("1.0"), None]),
                raw(&[Some("2"), Some("1.0"), Some("yesterday")]),
            ],
        )
        .unwrap_err();

        match err {
            SourceError::RowDecode { row, reason } => {
                assert_eq!(row, 1);
                assert!(reason.contains("seen_at"), "{reason}");
                assert!(reason.contains("yesterday"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_decode_rejects_short_rows() {
        let err = decode_batch(&schema(), vec![raw(&[Some("1")])]).unwrap_err();
        assert!(matches!(err, SourceError::RowDecode { row: 0, .. }));
    }
}
