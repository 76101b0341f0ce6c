//! JSON-lines output protocol.
//!
//! One JSON message per line on stdout:
//!
//! ```text
//! {"type":"RECORD","record":{"stream":"main_sales_orders","emitted_at":1718000000000,"data":{...}}}
//! {"type":"STATE","state":{"data":{"cursor_field":"updated_at","cursor_value":{...},...}}}
//! {"type":"CATALOG","catalog":{"streams":[...]}}
//! {"type":"CONNECTION_STATUS","connectionStatus":{"status":"SUCCEEDED"}}
//! ```

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use checkpoint::{SyncManager, SyncPhase};
use databricks_sync_source::{DatabricksCheckpoint, SourceError, SyncSink};
use serde_json::{json, Value};
use sync_core::{ColumnSchema, RecordEnvelope, SyncState};

pub fn record_message(record: &RecordEnvelope) -> Value {
    json!({ "type": "RECORD", "record": record.to_json() })
}

pub fn state_message(state: &SyncState) -> anyhow::Result<Value> {
    Ok(json!({ "type": "STATE", "state": { "data": serde_json::to_value(state)? } }))
}

pub fn connection_status_message(result: &Result<(), SourceError>) -> Value {
    match result {
        Ok(()) => json!({
            "type": "CONNECTION_STATUS",
            "connectionStatus": { "status": "SUCCEEDED" },
        }),
        Err(e) => json!({
            "type": "CONNECTION_STATUS",
            "connectionStatus": { "status": "FAILED", "message": e.to_string() },
        }),
    }
}

/// Advertise the stream: name, JSON schema, sync modes and the columns
/// that can serve as a cursor.
pub fn catalog_message(stream: &str, schema: &ColumnSchema, cursor_field: Option<&str>) -> Value {
    let default_cursor_field: Vec<&str> = cursor_field.into_iter().collect();
    json!({
        "type": "CATALOG",
        "catalog": {
            "streams": [{
                "name": stream,
                "json_schema": schema.to_json_schema(),
                "supported_sync_modes": ["full_refresh", "incremental"],
                "source_defined_cursor": false,
                "default_cursor_field": default_cursor_field,
                "cursor_candidates": schema.cursor_candidates(),
            }]
        }
    })
}

/// Write one message followed by a newline.
pub fn write_message<W: Write>(out: &mut W, message: &Value) -> anyhow::Result<()> {
    serde_json::to_writer(&mut *out, message)?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Parse a state file. Accepts either a bare state object or a `STATE`
/// message as printed by `read`.
pub fn parse_state(content: &str) -> anyhow::Result<SyncState> {
    let value: Value = serde_json::from_str(content).context("State is not valid JSON")?;
    let data = match value.get("type").and_then(Value::as_str) {
        Some("STATE") => value
            .get("state")
            .and_then(|s| s.get("data"))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("STATE message has no state.data"))?,
        _ => value,
    };
    serde_json::from_value(data).context("Invalid sync state")
}

pub fn read_state_file<P: AsRef<Path>>(path: P) -> anyhow::Result<SyncState> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read state file {path:?}"))?;
    parse_state(&content).with_context(|| format!("Failed to parse state file {path:?}"))
}

/// Sink that prints records and states as JSON lines and optionally
/// persists every state as a checkpoint.
pub struct JsonLinesSink<W> {
    out: W,
    stream: String,
    checkpoints: Option<SyncManager>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W, stream: impl Into<String>) -> Self {
        Self {
            out,
            stream: stream.into(),
            checkpoints: None,
        }
    }

    pub fn with_checkpoints(mut self, manager: SyncManager) -> Self {
        self.checkpoints = Some(manager);
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Persist first, then print: a STATE line on stdout is never ahead of
    /// the stored checkpoint.
    async fn write_state(&mut self, state: &SyncState, phase: SyncPhase) -> anyhow::Result<()> {
        if let Some(manager) = &self.checkpoints {
            let checkpoint = DatabricksCheckpoint::new(self.stream.clone(), state.clone());
            manager
                .emit_checkpoint(&checkpoint, phase)
                .await
                .context("Failed to persist checkpoint")?;
        }
        write_message(&mut self.out, &state_message(state)?)?;
        self.out.flush()?;
        Ok(())
    }
}

#[async_trait]
impl<W: Write + Send> SyncSink for JsonLinesSink<W> {
    async fn emit_record(&mut self, record: RecordEnvelope) -> anyhow::Result<()> {
        write_message(&mut self.out, &record_message(&record))
    }

    async fn emit_checkpoint(&mut self, state: &SyncState) -> anyhow::Result<()> {
        self.write_state(state, SyncPhase::Batch).await
    }

    async fn emit_final(&mut self, state: &SyncState) -> anyhow::Result<()> {
        self.write_state(state, SyncPhase::Final).await
    }
}
