//! databricks-sync
//!
//! Extracts one Databricks SQL table as a stream of JSON records, either as
//! a full refresh or incrementally above a stored cursor value.
//!
//! # Crates
//!
//! - `sync_core` - table identity, column schema, values, sync state
//! - `checkpoint` - durable checkpoint files
//! - `databricks_sync_source` - discovery, cursor queries, batched reads
//!
//! # CLI Usage
//!
//! ```bash
//! # Verify the warehouse answers queries
//! databricks-sync check --config source.toml
//!
//! # Print the stream catalog
//! databricks-sync discover --config source.toml
//!
//! # Incremental read, resuming from and persisting to a checkpoint dir
//! databricks-sync read --config source.toml \
//!   --cursor-field updated_at --checkpoint-dir .databricks-sync-checkpoints
//! ```

pub mod commands;
pub mod config;
pub mod output;

pub use commands::{error_kind, ReadOptions};
pub use config::{FileConfig, SourceArgs, SourceConfig};
pub use output::JsonLinesSink;
