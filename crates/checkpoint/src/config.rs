//! Sync configuration for checkpoint operations.

/// Where checkpoints are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointStorage {
    /// No checkpoint storage configured
    Disabled,
    /// One JSON file per stream under `dir`
    Filesystem { dir: String },
}

/// Configuration for sync operations.
///
/// Controls checkpoint emission and storage behavior.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Whether to emit checkpoints during sync.
    pub emit_checkpoints: bool,

    /// Storage backend for emitted checkpoints.
    pub checkpoint_storage: CheckpointStorage,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            emit_checkpoints: true,
            checkpoint_storage: CheckpointStorage::Filesystem {
                dir: ".databricks-sync-checkpoints".to_string(),
            },
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist checkpoints as files under `dir`.
    pub fn filesystem(dir: impl Into<String>) -> Self {
        Self {
            emit_checkpoints: true,
            checkpoint_storage: CheckpointStorage::Filesystem { dir: dir.into() },
        }
    }

    /// Do not persist checkpoints.
    pub fn disabled() -> Self {
        Self {
            emit_checkpoints: false,
            checkpoint_storage: CheckpointStorage::Disabled,
        }
    }

    /// Check if checkpoint emission is enabled and configured.
    pub fn should_emit_checkpoints(&self) -> bool {
        self.emit_checkpoints && self.checkpoint_storage != CheckpointStorage::Disabled
    }
}
