//! Wire types of the Databricks SQL Statement Execution API (`/api/2.0/sql/statements`).

use serde::{Deserialize, Serialize};

/// One result row: every scalar as text, `None` for SQL `NULL`.
pub type RawRow = Vec<Option<String>>;

/// How result chunks are delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    /// Rows embedded in the API responses
    #[default]
    Inline,
    /// Rows served from pre-signed URLs; needed for results over 25 MiB
    ExternalLinks,
}

impl std::str::FromStr for Disposition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "inline" => Ok(Disposition::Inline),
            "external-links" => Ok(Disposition::ExternalLinks),
            other => Err(format!(
                "unknown disposition '{other}', expected 'inline' or 'external-links'"
            )),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExecuteStatementRequest<'a> {
    pub statement: &'a str,
    pub warehouse_id: &'a str,
    pub wait_timeout: &'a str,
    pub on_wait_timeout: &'a str,
    pub format: &'a str,
    pub disposition: Disposition,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatementResponse {
    pub statement_id: String,
    pub status: StatementStatus,
    #[serde(default)]
    pub manifest: Option<ResultManifest>,
    #[serde(default)]
    pub result: Option<ResultData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatementStatus {
    pub state: StatementState,
    #[serde(default)]
    pub error: Option<ServiceError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Closed,
}

impl StatementState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StatementState::Pending | StatementState::Running)
    }
}

impl std::fmt::Display for StatementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StatementState::Pending => "PENDING",
            StatementState::Running => "RUNNING",
            StatementState::Succeeded => "SUCCEEDED",
            StatementState::Failed => "FAILED",
            StatementState::Canceled => "CANCELED",
            StatementState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// Error body used both in statement status and in non-2xx responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceError {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultManifest {
    #[serde(default)]
    pub schema: Option<ResultSchema>,
    #[serde(default)]
    pub total_chunk_count: Option<u64>,
    #[serde(default)]
    pub total_row_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultSchema {
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
}

/// A result column as described by the statement manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(default)]
    pub type_text: Option<String>,
    #[serde(default)]
    pub position: Option<u32>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, type_text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_text: Some(type_text.into()),
            position: None,
        }
    }
}

/// One chunk of a statement result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultData {
    #[serde(default)]
    pub chunk_index: Option<u64>,
    #[serde(default)]
    pub data_array: Option<Vec<RawRow>>,
    #[serde(default)]
    pub external_links: Option<Vec<ExternalLink>>,
    #[serde(default)]
    pub next_chunk_internal_link: Option<String>,
}

impl ResultData {
    /// Internal link of the chunk after this one, if any.
    pub fn next_link(&self) -> Option<String> {
        self.external_links
            .as_ref()
            .and_then(|links| links.last())
            .and_then(|link| link.next_chunk_internal_link.clone())
            .or_else(|| self.next_chunk_internal_link.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalLink {
    pub external_link: String,
    #[serde(default)]
    pub chunk_index: Option<u64>,
    #[serde(default)]
    pub next_chunk_internal_link: Option<String>,
}
