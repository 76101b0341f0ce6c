//! Resumable sync state and the record envelope emitted downstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::TableIdentity;
use crate::values::{CursorValue, Row};

/// Cursor state persisted by the caller between runs.
///
/// `cursor_value` never regresses for a given `cursor_field`: it only moves
/// forward as rows are observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub cursor_field: Option<String>,
    #[serde(default)]
    pub cursor_value: Option<CursorValue>,
    #[serde(default = "epoch")]
    pub last_sync_timestamp: DateTime<Utc>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            cursor_field: None,
            cursor_value: None,
            last_sync_timestamp: epoch(),
        }
    }
}

impl SyncState {
    /// State for a stream that has never been synced.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The stored cursor value, but only if it was recorded for `field`.
    pub fn cursor_for(&self, field: &str) -> Option<&CursorValue> {
        match self.cursor_field.as_deref() {
            Some(stored) if stored == field => self.cursor_value.as_ref(),
            _ => None,
        }
    }
}

/// One extracted row, tagged with its origin and emission time.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEnvelope {
    pub table: TableIdentity,
    pub emitted_at: DateTime<Utc>,
    pub data: Row,
}

impl RecordEnvelope {
    pub fn new(table: TableIdentity, emitted_at: DateTime<Utc>, data: Row) -> Self {
        Self {
            table,
            emitted_at,
            data,
        }
    }

    /// Render as a JSON record: stream name, emission time in epoch
    /// milliseconds, and the row as an object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "stream": self.table.stream_name(),
            "emitted_at": self.emitted_at.timestamp_millis(),
            "data": self.data.to_json(),
        })
    }
}
