//! Command-line interface for databricks-sync
//!
//! # Usage Examples
//!
//! ```bash
//! # Connection check
//! DATABRICKS_HOST=adb-123.azuredatabricks.net DATABRICKS_TOKEN=dapi... \
//! databricks-sync check --warehouse-id abc123
//!
//! # Full refresh of one table
//! databricks-sync read --config source.json
//!
//! # Incremental sync from a state file
//! databricks-sync read --config source.json \
//!   --cursor-field updated_at --state state.json
//! ```
//!
//! stdout carries only JSON-lines messages; logs go to stderr
//! (`RUST_LOG`, default `info`).

use std::sync::Arc;

use clap::{Parser, Subcommand};
use databricks_sync::{commands, error_kind, ReadOptions, SourceArgs};
use databricks_sync_source::{ConnectionManager, DatabricksConnector};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "databricks-sync")]
#[command(about = "Full-refresh and incremental extraction from a Databricks SQL table")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the warehouse is reachable and answers queries
    Check {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Print the table's stream catalog
    Discover {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Extract the table as RECORD and STATE messages
    Read {
        #[command(flatten)]
        source: SourceArgs,

        /// Previous state file (a state object or a STATE message)
        #[arg(long, value_name = "PATH")]
        state: Option<std::path::PathBuf>,

        /// Directory to read and write checkpoint files
        #[arg(long, value_name = "DIR")]
        checkpoint_dir: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        match error_kind(&e) {
            Some(kind) => eprintln!("Error [{kind}]: {e:#}"),
            None => eprintln!("Error: {e:#}"),
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Logs go to stderr; stdout is the message stream
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut stdout = std::io::stdout();

    match cli.command {
        Commands::Check { source } => {
            let config = source.load()?;
            let manager = connection_manager(&config);
            commands::check(&manager, &mut stdout).await?;
        }
        Commands::Discover { source } => {
            let config = source.load()?;
            let manager = connection_manager(&config);
            commands::discover(&manager, &config, &mut stdout).await?;
        }
        Commands::Read {
            source,
            state,
            checkpoint_dir,
        } => {
            let config = source.load()?;
            let manager = connection_manager(&config);
            let options = ReadOptions {
                state_file: state,
                checkpoint_dir,
            };

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted; stopping after the current batch");
                    on_signal.cancel();
                }
            });

            let outcome = commands::read(&manager, &config, &options, &mut stdout, &cancel).await?;
            if outcome.cancelled {
                anyhow::bail!("Read interrupted; last checkpoint was emitted");
            }
            info!(
                "Read {} records in {} batches",
                outcome.records_emitted, outcome.batches
            );
        }
    }

    Ok(())
}

fn connection_manager(config: &databricks_sync::SourceConfig) -> ConnectionManager {
    info!("Using {:?}", config.opts);
    ConnectionManager::new(
        Arc::new(DatabricksConnector::new(config.opts.clone())),
        config.retry.clone(),
    )
}
