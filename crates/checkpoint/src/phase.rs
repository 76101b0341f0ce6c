//! Sync phase enumeration for checkpoint tracking.

use serde::{Deserialize, Serialize};

/// The point in a sync pass at which a checkpoint was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Taken after a batch has been fully handed to the caller.
    ///
    /// A crash after this point resumes from here instead of from the
    /// start of the sync.
    Batch,

    /// Taken once the sync pass has read every batch.
    Final,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Batch => "batch",
            SyncPhase::Final => "final",
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncPhase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "batch" => Ok(SyncPhase::Batch),
            "final" => Ok(SyncPhase::Final),
            other => Err(anyhow::anyhow!("Unknown sync phase: {other}")),
        }
    }
}
