//! Databricks checkpoint: a stream's [`SyncState`] in checkpoint-file form.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sync_core::{CursorValue, MappedType, SyncState};

/// Checkpoint for one Databricks stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabricksCheckpoint {
    /// Stream name, `{catalog}_{schema}_{table}`
    pub stream: String,
    pub state: SyncState,
}

impl DatabricksCheckpoint {
    pub fn new(stream: impl Into<String>, state: SyncState) -> Self {
        Self {
            stream: stream.into(),
            state,
        }
    }

    pub fn into_state(self) -> SyncState {
        self.state
    }
}

impl checkpoint::Checkpoint for DatabricksCheckpoint {
    const SOURCE_TYPE: &'static str = "databricks";

    fn stream(&self) -> &str {
        &self.stream
    }

    /// `stream` when no cursor is stored, otherwise
    /// `stream:field:type:value`. The value comes last so timestamps keep
    /// their colons; `:` and `%` inside the stream and field names are
    /// percent-escaped.
    fn to_cli_string(&self) -> String {
        let stream = escape_name(&self.stream);
        match (&self.state.cursor_field, &self.state.cursor_value) {
            (Some(field), Some(value)) => format!(
                "{stream}:{}:{}:{value}",
                escape_name(field),
                value.mapped_type()
            ),
            _ => stream,
        }
    }

    fn from_cli_string(s: &str) -> Result<Self> {
        let mut parts = s.splitn(4, ':');
        let stream = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Invalid Databricks checkpoint '{s}': missing stream"))?;

        let state = match (parts.next(), parts.next(), parts.next()) {
            (None, None, None) => SyncState::empty(),
            (Some(field), Some(ty), Some(value)) if !field.is_empty() => {
                let ty = match ty {
                    "string" => MappedType::String,
                    "integer" => MappedType::Integer,
                    "number" => MappedType::Number,
                    "timestamp" => MappedType::Timestamp,
                    other => anyhow::bail!(
                        "Invalid Databricks checkpoint '{s}': unsupported cursor type '{other}'"
                    ),
                };
                let value = CursorValue::parse(value, ty)
                    .map_err(|e| anyhow::anyhow!("Invalid Databricks checkpoint '{s}': {e}"))?;
                SyncState {
                    cursor_field: Some(unescape_name(field)?),
                    cursor_value: Some(value),
                    ..SyncState::empty()
                }
            }
            _ => anyhow::bail!(
                "Invalid Databricks checkpoint '{s}': expected 'stream' or 'stream:field:type:value'"
            ),
        };

        Ok(Self {
            stream: unescape_name(stream)?,
            state,
        })
    }
}

fn escape_name(name: &str) -> String {
    name.replace('%', "%25").replace(':', "%3A")
}

fn unescape_name(name: &str) -> Result<String> {
    let mut out = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let escape = rest.get(pos..pos + 3);
        match escape {
            Some("%25") => out.push('%'),
            Some("%3A") | Some("%3a") => out.push(':'),
            _ => anyhow::bail!("Invalid escape in checkpoint name '{name}'"),
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}
