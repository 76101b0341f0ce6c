//! Cursor state tracking across batches.

use chrono::{DateTime, Utc};
use sync_core::{RowBatch, SyncState};

use crate::error::SourceError;
use crate::query::CursorColumn;

/// Folds observed batches into [`SyncState`] snapshots.
///
/// The tracker itself holds no state: every call takes the previous snapshot
/// and returns the next one, so snapshots can be checkpointed as they are
/// produced.
#[derive(Debug, Clone)]
pub struct StateTracker {
    cursor: Option<CursorColumn>,
}

impl StateTracker {
    /// Track `cursor`, or only the sync timestamp when `None` (full refresh).
    pub fn new(cursor: Option<CursorColumn>) -> Self {
        Self { cursor }
    }

    pub fn cursor(&self) -> Option<&CursorColumn> {
        self.cursor.as_ref()
    }

    /// The state to start extraction from.
    ///
    /// A stored cursor recorded for a different field is discarded; a stored
    /// cursor for this field is coerced to the column's type.
    pub fn initial(&self, previous: &SyncState) -> Result<SyncState, SourceError> {
        let Some(cursor) = &self.cursor else {
            return Ok(previous.clone());
        };

        let cursor_value = match previous.cursor_for(cursor.name()) {
            Some(value) => Some(cursor.coerce(value)?),
            None => {
                if let (Some(field), Some(_)) = (&previous.cursor_field, &previous.cursor_value) {
                    tracing::warn!(
                        "Stored state tracks cursor field '{field}', not '{}'; starting without a cursor value",
                        cursor.name()
                    );
                }
                None
            }
        };

        Ok(SyncState {
            cursor_field: Some(cursor.name().to_string()),
            cursor_value,
            last_sync_timestamp: previous.last_sync_timestamp,
        })
    }

    /// Fold `batch` into `state`, stamping the result with the current time.
    pub fn observe(&self, batch: &RowBatch, state: &SyncState) -> Result<SyncState, SourceError> {
        self.observe_at(batch, state, Utc::now())
    }

    /// Fold `batch` into `state`.
    ///
    /// With a cursor, the result's cursor value is the maximum of the prior
    /// value and every non-null cursor value in the batch, so it never
    /// regresses. Without a cursor only `last_sync_timestamp` changes.
    pub fn observe_at(
        &self,
        batch: &RowBatch,
        state: &SyncState,
        now: DateTime<Utc>,
    ) -> Result<SyncState, SourceError> {
        let Some(cursor) = &self.cursor else {
            return Ok(SyncState {
                last_sync_timestamp: now,
                ..state.clone()
            });
        };

        let mut max = match state.cursor_for(cursor.name()) {
            Some(value) => Some(cursor.coerce(value)?),
            None => None,
        };

        for (index, row) in batch.iter().enumerate() {
            let Some(observed) = row.get(cursor.name()).and_then(|v| v.to_cursor()) else {
                continue;
            };
            max = Some(match max {
                None => observed,
                Some(current) => current.max(observed).map_err(|e| SourceError::RowDecode {
                    row: index,
                    reason: format!("cursor field '{}': {e}", cursor.name()),
                })?,
            });
        }

        Ok(SyncState {
            cursor_field: Some(cursor.name().to_string()),
            cursor_value: max,
            last_sync_timestamp: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::CursorSpec;
    use chrono::TimeZone;
    use sync_core::{ColumnDef, ColumnSchema, CursorValue, Row, Value};

    fn schema() -> ColumnSchema {
        ColumnSchema::new(vec![
            ColumnDef::new("id", "bigint"),
            ColumnDef::new("updated_at", "timestamp"),
        ])
        .unwrap()
    }

    fn ts(day: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn batch(days: &[Option<u32>]) -> RowBatch {
        RowBatch::new(
            days.iter()
                .enumerate()
                .map(|(i, day)| {
                    let mut row = Row::new();
                    row.push("id", Value::Integer(i as i64));
                    row.push(
                        "updated_at",
                        day.map(|d| Value::Timestamp(ts(d))).unwrap_or(Value::Null),
                    );
                    row
                })
                .collect(),
        )
    }

    fn tracker(field: &str) -> StateTracker {
        StateTracker::new(Some(CursorSpec::new(field).resolve(&schema()).unwrap()))
    }

    #[test]
    fn test_observe_takes_max_regardless_of_row_order() {
        let tracker = tracker("updated_at");
        let state = tracker.initial(&SyncState::empty()).unwrap();

        let next = tracker
            .observe_at(&batch(&[Some(3), Some(5), None, Some(4)]), &state, ts(20))
            .unwrap();
        assert_eq!(next.cursor_field.as_deref(), Some("updated_at"));
        assert_eq!(next.cursor_value, Some(CursorValue::Timestamp(ts(5))));
        assert_eq!(next.last_sync_timestamp, ts(20));
    }

    #[test]
    fn test_observe_never_regresses() {
        let tracker = tracker("updated_at");
        let state = SyncState {
            cursor_field: Some("updated_at".to_string()),
            cursor_value: Some(CursorValue::Timestamp(ts(10))),
            last_sync_timestamp: ts(1),
        };

        let next = tracker
            .observe_at(&batch(&[Some(2), Some(3)]), &state, ts(20))
            .unwrap();
        assert_eq!(next.cursor_value, Some(CursorValue::Timestamp(ts(10))));

        let empty = tracker
            .observe_at(&RowBatch::new(vec![]), &next, ts(21))
            .unwrap();
        assert_eq!(empty.cursor_value, Some(CursorValue::Timestamp(ts(10))));
    }

    #[test]
    fn test_full_refresh_only_touches_timestamp() {
        let tracker = StateTracker::new(None);
        let state = SyncState {
            cursor_field: Some("legacy".to_string()),
            cursor_value: Some(CursorValue::Integer(7)),
            last_sync_timestamp: ts(1),
        };

        let next = tracker
            .observe_at(&batch(&[Some(9)]), &state, ts(2))
            .unwrap();
        assert_eq!(next.cursor_field.as_deref(), Some("legacy"));
        assert_eq!(next.cursor_value, Some(CursorValue::Integer(7)));
        assert_eq!(next.last_sync_timestamp, ts(2));
    }

    #[test]
    fn test_initial_discards_cursor_of_other_field() {
        let tracker = tracker("updated_at");
        let stored = SyncState {
            cursor_field: Some("id".to_string()),
            cursor_value: Some(CursorValue::Integer(42)),
            last_sync_timestamp: ts(1),
        };
        let initial = tracker.initial(&stored).unwrap();
        assert_eq!(initial.cursor_field.as_deref(), Some("updated_at"));
        assert_eq!(initial.cursor_value, None);
    }

    #[test]
    fn test_initial_coerces_stored_text() {
        let tracker = tracker("id");
        let stored = SyncState {
            cursor_field: Some("id".to_string()),
            cursor_value: Some(CursorValue::String("41".to_string())),
            last_sync_timestamp: ts(1),
        };
        let initial = tracker.initial(&stored).unwrap();
        assert_eq!(initial.cursor_value, Some(CursorValue::Integer(41)));
    }
}
