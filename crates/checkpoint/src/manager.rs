//! Generic sync manager for checkpoint operations.

use crate::{
    store::CheckpointStore, Checkpoint, CheckpointFile, CheckpointID, CheckpointStorage,
    FilesystemStore, SyncConfig, SyncPhase,
};

/// Manager for handling sync operations with checkpoint tracking.
///
/// # Example
///
/// ```rust,ignore
/// use checkpoint::{SyncConfig, SyncManager, SyncPhase};
///
/// let manager = SyncManager::new(SyncConfig::filesystem("/tmp/checkpoints"));
///
/// // Save a checkpoint
/// manager.emit_checkpoint(&checkpoint, SyncPhase::Batch).await?;
///
/// // Load the latest checkpoint for a stream
/// let loaded: Option<DatabricksCheckpoint> = manager.read_checkpoint("main_sales_orders").await?;
/// ```
pub struct SyncManager {
    config: SyncConfig,
    store: Option<Box<dyn CheckpointStore>>,
}

impl SyncManager {
    /// Create a sync manager whose store is derived from the configuration.
    pub fn new(config: SyncConfig) -> Self {
        let store: Option<Box<dyn CheckpointStore>> = match &config.checkpoint_storage {
            CheckpointStorage::Disabled => None,
            CheckpointStorage::Filesystem { dir } => Some(Box::new(FilesystemStore::new(dir))),
        };
        Self { config, store }
    }

    /// Create a sync manager backed by an explicit store.
    pub fn with_store(config: SyncConfig, store: Box<dyn CheckpointStore>) -> Self {
        Self {
            config,
            store: Some(store),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Emit a checkpoint.
    ///
    /// This is a **SAVING** operation. When it returns `Ok`, the checkpoint
    /// is durable in the configured store.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Emission is enabled but no storage backend is configured
    /// - Failed to write checkpoint
    pub async fn emit_checkpoint<C: Checkpoint>(
        &self,
        checkpoint: &C,
        phase: SyncPhase,
    ) -> anyhow::Result<()> {
        if !self.config.emit_checkpoints {
            return Ok(());
        }

        let store = self.store.as_ref().ok_or_else(|| {
            anyhow::anyhow!("No checkpoint storage configured (checkpoint storage is disabled)")
        })?;

        let id = CheckpointID::new(C::SOURCE_TYPE, checkpoint.stream());
        let file = CheckpointFile::new(checkpoint, phase)?;
        store.store_checkpoint(&id, &file).await?;

        tracing::info!(
            "Emitted {} checkpoint for stream '{}': {}",
            phase,
            checkpoint.stream(),
            checkpoint.to_cli_string()
        );

        Ok(())
    }

    /// Read and parse the latest checkpoint for `stream`.
    ///
    /// This is a **LOADING** operation. Returns `Ok(None)` when no
    /// checkpoint has been stored yet or storage is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The stored checkpoint belongs to a different source type
    /// - Failed to read or deserialize the checkpoint
    pub async fn read_checkpoint<C: Checkpoint>(&self, stream: &str) -> anyhow::Result<Option<C>> {
        let Some(store) = self.store.as_ref() else {
            return Ok(None);
        };

        let id = CheckpointID::new(C::SOURCE_TYPE, stream);
        match store.read_checkpoint(&id).await? {
            Some(file) => Ok(Some(file.parse::<C>()?)),
            None => Ok(None),
        }
    }
}
