//! Error taxonomy for the Databricks source.

use serde::Serialize;
use sync_core::TableIdentity;

/// Stable tag for a [`SourceError`], suitable for logs and machine output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Connection,
    Authentication,
    SchemaNotFound,
    AmbiguousSchema,
    QueryBuild,
    RowDecode,
    TransientIo,
    Statement,
    Emit,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "CONNECTION",
            ErrorKind::Authentication => "AUTHENTICATION",
            ErrorKind::SchemaNotFound => "SCHEMA_NOT_FOUND",
            ErrorKind::AmbiguousSchema => "AMBIGUOUS_SCHEMA",
            ErrorKind::QueryBuild => "QUERY_BUILD",
            ErrorKind::RowDecode => "ROW_DECODE",
            ErrorKind::TransientIo => "TRANSIENT_IO",
            ErrorKind::Statement => "STATEMENT",
            ErrorKind::Emit => "EMIT",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while talking to the warehouse or extracting rows.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// Endpoint unreachable, or still failing after every retry.
    #[error("connection error: {0}")]
    Connection(String),

    /// Credential rejected by the workspace. Never retried.
    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("table {0} does not exist or is not visible to this credential")]
    SchemaNotFound(TableIdentity),

    #[error("table {table} does not resolve uniquely: {reason}")]
    AmbiguousSchema { table: TableIdentity, reason: String },

    /// Invalid cursor field or a cursor value that does not fit its column.
    #[error("cannot build query: {0}")]
    QueryBuild(String),

    /// A row in the current batch could not be decoded.
    #[error("cannot decode row {row} of the current batch: {reason}")]
    RowDecode { row: usize, reason: String },

    /// Network blip or warehouse temporarily unavailable.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// The warehouse ran the statement and reported it failed or was cancelled.
    #[error("statement {state}: [{code}] {message}")]
    Statement {
        state: String,
        code: String,
        message: String,
    },

    /// The caller's sink rejected a record or checkpoint.
    #[error("failed to emit output: {0}")]
    Emit(String),
}

impl SourceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::Connection(_) => ErrorKind::Connection,
            SourceError::Authentication(_) => ErrorKind::Authentication,
            SourceError::SchemaNotFound(_) => ErrorKind::SchemaNotFound,
            SourceError::AmbiguousSchema { .. } => ErrorKind::AmbiguousSchema,
            SourceError::QueryBuild(_) => ErrorKind::QueryBuild,
            SourceError::RowDecode { .. } => ErrorKind::RowDecode,
            SourceError::TransientIo(_) => ErrorKind::TransientIo,
            SourceError::Statement { .. } => ErrorKind::Statement,
            SourceError::Emit(_) => ErrorKind::Emit,
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::TransientIo(_))
    }

    pub(crate) fn emit(err: anyhow::Error) -> Self {
        SourceError::Emit(format!("{err:#}"))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            SourceError::TransientIo(err.to_string())
        } else if err.is_decode() {
            SourceError::Connection(format!("unexpected response from workspace: {err}"))
        } else {
            SourceError::Connection(err.to_string())
        }
    }
}
