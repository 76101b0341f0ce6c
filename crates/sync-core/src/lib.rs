//! Core data model for databricks-sync.
//!
//! This crate holds the types shared by the extraction pipeline and its
//! callers:
//!
//! - [`TableIdentity`] - the `catalog.schema.table` being synced
//! - [`MappedType`] - the fixed semantic type universe remote types map into
//! - [`ColumnSchema`] - ordered, uniquely named columns of the relation
//! - [`Value`] / [`CursorValue`] - decoded scalars and orderable cursor scalars
//! - [`Row`] / [`RowBatch`] - decoded result rows
//! - [`RecordEnvelope`] - the unit emitted downstream
//! - [`SyncState`] - the resumable cursor state handed back to the caller
//!
//! # Architecture
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    ├─── checkpoint              (persists SyncState snapshots)
//!    └─── databricks-sync-source  (discovers, queries, decodes, tracks state)
//! ```

pub mod schema;
pub mod state;
pub mod types;
pub mod values;

pub use schema::{ColumnDef, ColumnSchema, SchemaError, TableIdentity};
pub use state::{RecordEnvelope, SyncState};
pub use types::MappedType;
pub use values::{CursorValue, Row, RowBatch, Value, ValueError};
