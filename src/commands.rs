//! The `check`, `discover` and `read` commands, independent of how the
//! connection manager and output stream are built.

use std::io::Write;
use std::path::PathBuf;

use checkpoint::{SyncConfig, SyncManager};
use databricks_sync_source::{
    discover_table, run_sync, ConnectionManager, DatabricksCheckpoint, ErrorKind, SourceError,
    SyncOutcome, SyncRequest,
};
use sync_core::{ColumnSchema, SyncState};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SourceConfig;
use crate::output::{
    catalog_message, connection_status_message, read_state_file, write_message, JsonLinesSink,
};

/// Where `read` takes its previous state from and persists checkpoints to.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Previous state file; takes precedence over the checkpoint store
    pub state_file: Option<PathBuf>,
    /// Directory of the filesystem checkpoint store
    pub checkpoint_dir: Option<String>,
}

/// Print the connection status. Fails when the warehouse cannot be reached
/// or does not answer `SELECT 1`.
pub async fn check<W: Write>(manager: &ConnectionManager, out: &mut W) -> anyhow::Result<()> {
    let result = databricks_sync_source::check(manager).await;
    write_message(out, &connection_status_message(&result))?;
    out.flush()?;
    Ok(result?)
}

/// Discover the table's columns and print them as a catalog.
pub async fn discover<W: Write>(
    manager: &ConnectionManager,
    config: &SourceConfig,
    out: &mut W,
) -> anyhow::Result<ColumnSchema> {
    let schema = discover_table(manager, &config.table).await?;
    info!(
        "Discovered {} columns for {}",
        schema.len(),
        config.table.stream_name()
    );
    let catalog = catalog_message(
        &config.table.stream_name(),
        &schema,
        config.cursor_field.as_deref(),
    );
    write_message(out, &catalog)?;
    out.flush()?;
    Ok(schema)
}

/// Run one sync pass, printing records and states to `out`.
pub async fn read<W: Write + Send>(
    manager: &ConnectionManager,
    config: &SourceConfig,
    options: &ReadOptions,
    out: &mut W,
    cancel: &CancellationToken,
) -> anyhow::Result<SyncOutcome> {
    let stream = config.table.stream_name();
    let checkpoints = options
        .checkpoint_dir
        .as_ref()
        .map(|dir| SyncManager::new(SyncConfig::filesystem(dir.clone())));

    let previous_state = match (&options.state_file, &checkpoints) {
        (Some(path), _) => read_state_file(path)?,
        (None, Some(store)) => match store.read_checkpoint::<DatabricksCheckpoint>(&stream).await? {
            Some(checkpoint) => {
                info!("Resuming {stream} from stored checkpoint");
                checkpoint.into_state()
            }
            None => SyncState::empty(),
        },
        (None, None) => SyncState::empty(),
    };

    let mut request = SyncRequest::new(config.table.clone())
        .with_previous_state(previous_state)
        .with_batch_size(config.batch_size);
    if let Some(field) = &config.cursor_field {
        request = request.with_cursor(field.clone());
    }

    let mut sink = JsonLinesSink::new(out, stream);
    if let Some(checkpoints) = checkpoints {
        sink = sink.with_checkpoints(checkpoints);
    }

    let outcome = run_sync(manager, request, &mut sink, cancel).await?;
    if outcome.cancelled {
        warn!(
            "Read cancelled after {} batches ({} records)",
            outcome.batches, outcome.records_emitted
        );
    }
    Ok(outcome)
}

/// The [`ErrorKind`] of the first source error in `err`'s chain.
pub fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SourceError>())
        .map(SourceError::kind)
}
