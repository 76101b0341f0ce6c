//! Databricks SQL source for databricks-sync
//!
//! Extracts rows from one Unity Catalog (or `hive_metastore`) table through
//! the SQL Statement Execution API, either as a full refresh or
//! incrementally above a stored cursor value.
//!
//! ```text
//! ConnectionManager ──► BatchReader ──► StateTracker ──┐
//!        │                                             ├──► run_sync ──► SyncSink
//!        └──► discover (schema)   build_query ─────────┘
//! ```
//!
//! Connection handling is behind the [`Connector`] / [`Connection`] /
//! [`RowCursor`] traits; [`DatabricksConnector`] talks HTTPS to a workspace
//! and [`testing::MemoryWarehouse`] answers from memory.

pub mod checkpoint;
mod client;
mod connection;
mod error;
mod query;
mod reader;
mod retry;
mod schema;
mod state;
pub mod statement;
mod sync;
pub mod testing;

use std::time::Duration;

pub use checkpoint::DatabricksCheckpoint;
pub use client::{normalize_workspace_url, DatabricksConnection, DatabricksConnector};
pub use connection::{
    check, Connection, ConnectionManager, Connector, ManagedConnection, ManagedCursor, RowCursor,
};
pub use error::{ErrorKind, SourceError};
pub use query::{
    build_query, quote_identifier, quote_string, quote_table, render_literal, CursorColumn,
    CursorSpec, QueryText,
};
pub use reader::{decode_batch, read, BatchReader};
pub use retry::{retry, RetryPolicy, DEFAULT_MAX_ATTEMPTS, MAX_ATTEMPTS_CEILING};
pub use schema::{discover, discover_table, HIVE_METASTORE};
pub use state::StateTracker;
pub use statement::Disposition;
pub use sync::{
    run_sync, SyncFailure, SyncOutcome, SyncRequest, SyncSink, SyncStage, DEFAULT_BATCH_SIZE,
};

/// Default time a statement may run before it is cancelled
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(600);
/// Default interval between statement status polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Databricks workspace connection options
#[derive(Clone)]
pub struct SourceOpts {
    /// Workspace URL, e.g. `https://adb-123.azuredatabricks.net`
    pub workspace_url: String,
    /// Personal access token
    pub personal_access_token: String,
    /// SQL warehouse id
    pub warehouse_id: String,
    /// How result chunks are delivered
    pub disposition: Disposition,
    /// Cancel statements still running after this long
    pub statement_timeout: Duration,
    /// Interval between status polls of a running statement
    pub poll_interval: Duration,
}

impl SourceOpts {
    pub fn new(
        workspace_url: impl Into<String>,
        personal_access_token: impl Into<String>,
        warehouse_id: impl Into<String>,
    ) -> Self {
        Self {
            workspace_url: workspace_url.into(),
            personal_access_token: personal_access_token.into(),
            warehouse_id: warehouse_id.into(),
            disposition: Disposition::default(),
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl std::fmt::Debug for SourceOpts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceOpts")
            .field("workspace_url", &self.workspace_url)
            .field("personal_access_token", &"***")
            .field("warehouse_id", &self.warehouse_id)
            .field("disposition", &self.disposition)
            .field("statement_timeout", &self.statement_timeout)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}
