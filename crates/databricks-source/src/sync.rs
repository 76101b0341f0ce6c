//! One sync pass over a table: discover, build the query, stream batches,
//! checkpoint after each one, finalize.
//!
//! ```text
//! INIT -> DISCOVER_SCHEMA -> BUILD_QUERY -> STREAM_BATCHES -> FINALIZE
//!   \__________\_______________\________________\_______________-> FAILED
//! ```
//!
//! Records of a batch are handed to the sink only after the whole batch has
//! decoded, and the batch's checkpoint is awaited before the next batch is
//! read. A failure therefore leaves the last awaited checkpoint as a safe
//! resume point, and it is returned in [`SyncFailure`].

use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sync_core::{ColumnSchema, RecordEnvelope, SyncState, TableIdentity};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::connection::{ConnectionManager, ManagedConnection};
use crate::error::SourceError;
use crate::query::{build_query, CursorSpec};
use crate::reader::read;
use crate::schema::discover;
use crate::state::StateTracker;

/// Rows per batch when the caller does not choose
pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStage {
    Init,
    DiscoverSchema,
    BuildQuery,
    StreamBatches,
    Finalize,
    Failed,
}

impl std::fmt::Display for SyncStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncStage::Init => "INIT",
            SyncStage::DiscoverSchema => "DISCOVER_SCHEMA",
            SyncStage::BuildQuery => "BUILD_QUERY",
            SyncStage::StreamBatches => "STREAM_BATCHES",
            SyncStage::Finalize => "FINALIZE",
            SyncStage::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Receives the output of a sync pass.
#[async_trait]
pub trait SyncSink: Send {
    async fn emit_record(&mut self, record: RecordEnvelope) -> anyhow::Result<()>;

    /// Called after every batch. The next batch is not read until this
    /// returns, so an implementation that persists here gets durable
    /// per-batch checkpoints.
    async fn emit_checkpoint(&mut self, state: &SyncState) -> anyhow::Result<()>;

    /// Called once after the last batch.
    async fn emit_final(&mut self, state: &SyncState) -> anyhow::Result<()> {
        self.emit_checkpoint(state).await
    }
}

/// What to sync and where to resume from.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub table: TableIdentity,
    /// `None` syncs the whole table every time
    pub cursor: Option<CursorSpec>,
    pub previous_state: SyncState,
    pub batch_size: NonZeroUsize,
    /// Skips discovery when set
    pub schema: Option<ColumnSchema>,
}

impl SyncRequest {
    pub fn new(table: TableIdentity) -> Self {
        Self {
            table,
            cursor: None,
            previous_state: SyncState::empty(),
            batch_size: NonZeroUsize::new(DEFAULT_BATCH_SIZE).unwrap_or(NonZeroUsize::MIN),
            schema: None,
        }
    }

    pub fn with_cursor(mut self, field: impl Into<String>) -> Self {
        self.cursor = Some(CursorSpec::new(field));
        self
    }

    pub fn with_previous_state(mut self, state: SyncState) -> Self {
        self.previous_state = state;
        self
    }

    pub fn with_batch_size(mut self, batch_size: NonZeroUsize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_schema(mut self, schema: ColumnSchema) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// Result of a completed or cancelled sync pass.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// The final state, or the last checkpoint if the pass was cancelled
    pub final_state: SyncState,
    pub records_emitted: u64,
    pub batches: u64,
    pub cancelled: bool,
    pub schema: Arc<ColumnSchema>,
}

/// A failed sync pass.
#[derive(Debug, thiserror::Error)]
#[error("sync failed during {stage}: {error}")]
pub struct SyncFailure {
    /// Stage that was running when the error occurred
    pub stage: SyncStage,
    #[source]
    pub error: SourceError,
    /// Last state handed to the sink as a checkpoint, or the previous
    /// state if no batch completed. Safe to resume from.
    pub last_checkpoint: SyncState,
}

struct Progress {
    stage: SyncStage,
    last_checkpoint: SyncState,
}

impl Progress {
    fn enter(&mut self, stage: SyncStage) {
        debug!("Sync stage {} -> {stage}", self.stage);
        self.stage = stage;
    }

    fn fail(self, error: SourceError) -> SyncFailure {
        debug!("Sync stage {} -> {}", self.stage, SyncStage::Failed);
        error!("Sync failed during {}: {error}", self.stage);
        SyncFailure {
            stage: self.stage,
            error,
            last_checkpoint: self.last_checkpoint,
        }
    }
}

/// Run one sync pass.
///
/// `cancel` is checked between batches; a cancelled pass returns
/// `Ok` with `cancelled: true` and the last checkpoint as its state. The
/// connection acquired here is closed on every path.
pub async fn run_sync(
    manager: &ConnectionManager,
    request: SyncRequest,
    sink: &mut dyn SyncSink,
    cancel: &CancellationToken,
) -> Result<SyncOutcome, SyncFailure> {
    info!(
        "Starting {} sync of {}",
        if request.cursor.is_some() {
            "incremental"
        } else {
            "full refresh"
        },
        request.table
    );

    let mut progress = Progress {
        stage: SyncStage::Init,
        last_checkpoint: request.previous_state.clone(),
    };

    let conn = match manager.acquire().await {
        Ok(conn) => conn,
        Err(e) => return Err(progress.fail(e)),
    };

    let result = drive(&conn, request, sink, cancel, &mut progress).await;
    conn.close().await;
    result.map_err(|e| progress.fail(e))
}

async fn drive(
    conn: &ManagedConnection,
    request: SyncRequest,
    sink: &mut dyn SyncSink,
    cancel: &CancellationToken,
    progress: &mut Progress,
) -> Result<SyncOutcome, SourceError> {
    progress.enter(SyncStage::DiscoverSchema);
    let schema = match request.schema {
        Some(schema) => {
            debug!("Using supplied schema for {}", request.table);
            schema
        }
        None => discover(&request.table, conn).await?,
    };
    let schema = Arc::new(schema);

    progress.enter(SyncStage::BuildQuery);
    let cursor = request
        .cursor
        .as_ref()
        .map(|spec| spec.resolve(&schema))
        .transpose()?;
    let tracker = StateTracker::new(cursor);
    let mut state = tracker.initial(&request.previous_state)?;
    let query = build_query(&request.table, tracker.cursor(), state.cursor_value.as_ref())?;
    info!("Extraction query: {query}");

    progress.enter(SyncStage::StreamBatches);
    let mut reader = read(conn, &query, request.batch_size, schema.clone()).await?;
    let mut records_emitted = 0u64;
    let mut batches = 0u64;

    loop {
        if cancel.is_cancelled() {
            info!(
                "Sync of {} cancelled after {batches} batches; returning last checkpoint",
                request.table
            );
            return Ok(SyncOutcome {
                final_state: progress.last_checkpoint.clone(),
                records_emitted,
                batches,
                cancelled: true,
                schema,
            });
        }

        let Some(batch) = reader.next_batch().await? else {
            break;
        };

        let next_state = tracker.observe(&batch, &state)?;
        let rows = batch.len() as u64;
        let emitted_at = Utc::now();
        for row in batch.into_rows() {
            sink.emit_record(RecordEnvelope::new(request.table.clone(), emitted_at, row))
                .await
                .map_err(SourceError::emit)?;
        }
        sink.emit_checkpoint(&next_state)
            .await
            .map_err(SourceError::emit)?;

        state = next_state;
        progress.last_checkpoint = state.clone();
        records_emitted += rows;
        batches += 1;
        debug!(
            "Batch {batches}: {rows} rows, cursor {}",
            state
                .cursor_value
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }

    progress.enter(SyncStage::Finalize);
    let final_state = SyncState {
        last_sync_timestamp: Utc::now(),
        ..state
    };
    sink.emit_final(&final_state)
        .await
        .map_err(SourceError::emit)?;
    progress.last_checkpoint = final_state.clone();

    info!(
        "Sync of {} finished: {records_emitted} records in {batches} batches",
        request.table
    );
    Ok(SyncOutcome {
        final_state,
        records_emitted,
        batches,
        cancelled: false,
        schema,
    })
}
