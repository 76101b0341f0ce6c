//! Checkpoint storage trait and shared types.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::CheckpointFile;

/// Checkpoint identifier for storage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointID {
    /// Source type (e.g., "databricks")
    pub source_type: String,
    /// Stream name (e.g., "main_sales_orders")
    pub stream: String,
}

impl CheckpointID {
    pub fn new(source_type: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            stream: stream.into(),
        }
    }

    /// Key usable as a file or record name.
    pub fn key(&self) -> String {
        let sanitize = |s: &str| {
            s.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect::<String>()
        };
        format!(
            "{}_{}",
            sanitize(&self.source_type),
            sanitize(&self.stream)
        )
    }
}

/// Trait for checkpoint storage operations.
///
/// A store keeps only the latest checkpoint per [`CheckpointID`]; a write
/// must be durable when `store_checkpoint` returns.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Store a checkpoint, replacing any previous one with the same id.
    async fn store_checkpoint(&self, id: &CheckpointID, file: &CheckpointFile) -> Result<()>;

    /// Read the latest checkpoint for `id`.
    ///
    /// Returns None if the checkpoint doesn't exist.
    async fn read_checkpoint(&self, id: &CheckpointID) -> Result<Option<CheckpointFile>>;
}
