//! Checkpoint management for databricks-sync
//!
//! Provides storage-agnostic checkpoint handling with support for
//! source-specific checkpoint types.
//!
//! # Architecture
//!
//! This crate provides a generic checkpoint system that:
//! - Defines the `Checkpoint` trait for source-specific checkpoint types
//! - Provides `CheckpointFile` wrapper for storage-agnostic serialization
//! - Manages checkpoint saving/loading via `SyncManager`
//! - Supports multiple storage backends via `CheckpointStore` trait
//!
//! ## Storage Backends
//!
//! - `FilesystemStore` - One JSON file per stream, replaced atomically
//! - `MemoryStore` - Process-local storage, useful in tests and dry runs
//!
//! A checkpoint is emitted after every batch (`SyncPhase::Batch`) and once
//! more when the sync finishes (`SyncPhase::Final`). Each write replaces the
//! previous one, so reading always returns the latest durable position.

mod config;
mod file;
mod filesystem;
mod manager;
mod memory;
mod phase;
pub mod store;


pub use config::{CheckpointStorage, SyncConfig};
pub use file::CheckpointFile;
pub use filesystem::FilesystemStore;
pub use manager::SyncManager;
pub use memory::MemoryStore;
pub use phase::SyncPhase;
pub use store::{CheckpointID, CheckpointStore};

/// Trait that source-specific checkpoints must implement.
///
/// # Example
///
/// ```rust
/// use checkpoint::Checkpoint;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct OffsetCheckpoint {
///     pub stream: String,
///     pub offset: i64,
/// }
///
/// impl Checkpoint for OffsetCheckpoint {
///     const SOURCE_TYPE: &'static str = "offsets";
///
///     fn stream(&self) -> &str {
///         &self.stream
///     }
///
///     fn to_cli_string(&self) -> String {
///         format!("{}:{}", self.stream, self.offset)
///     }
///
///     fn from_cli_string(s: &str) -> anyhow::Result<Self> {
///         let (stream, offset) = s
///             .rsplit_once(':')
///             .ok_or_else(|| anyhow::anyhow!("Invalid checkpoint format"))?;
///         Ok(Self {
///             stream: stream.to_string(),
///             offset: offset.parse()?,
///         })
///     }
/// }
/// ```
pub trait Checkpoint: serde::Serialize + for<'de> serde::Deserialize<'de> + Clone {
    /// Source type identifier (e.g., "databricks").
    ///
    /// Stored alongside the checkpoint and validated when it is loaded.
    const SOURCE_TYPE: &'static str;

    /// Name of the stream this checkpoint belongs to.
    ///
    /// Checkpoints are keyed by `(SOURCE_TYPE, stream)`.
    fn stream(&self) -> &str;

    /// Convert to CLI-friendly string format.
    ///
    /// The returned string should be parseable by `from_cli_string()`.
    fn to_cli_string(&self) -> String;

    /// Parse from CLI string format.
    fn from_cli_string(s: &str) -> anyhow::Result<Self>
    where
        Self: Sized;
}
