///
/// This module implements the full CLI interface for bucket-sync—handling command parsing,
/// argument validation, main entrypoints, and user-visible invocations.
///
/// All core business logic (identity reconciliation, hierarchy synthesis, paging) lives in
/// the [`bucket-sync-core`] crate. This module is strictly for CLI glue, ergonomic argument
/// exposure, and orchestration.
///
/// ## Features
/// - Entry struct [`Cli`] defines all user-facing options and subcommands (see below).
/// - Subcommand routing (`sync`, `reindex`) and argument validation.
/// - Async entrypoint (`run`) for programmatic invocation and integration testing.
/// - Logging, tracing, and structured error output at CLI level.
///
/// ## How To Use
/// - For command-line users: use the installed `bucket-sync` binary with `--help`.
/// - For programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// ## Extending
/// When adding features or subcommands, update [`Commands`] below
/// and keep all non-trivial business logic inside `bucket-sync-core`.
///
/// ---
///
/// [`bucket-sync-core`]: ../../bucket-sync-core/
/// [`Cli`]: struct.Cli.html
/// [`run`]: fn.run.html
/// [`Commands`]: enum.Commands.html
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use bucket_sync_core::synchronise::SyncOrchestrator;

use crate::load_config::{load_config, CliConfig};
use crate::local::{LocalBucketClient, LocalRecordStore, LocalSyncPointStore};

/// CLI for bucket-sync: mirror S3-compatible buckets into a record store.
#[derive(Parser)]
#[clap(
    name = "bucket-sync",
    version,
    about = "Synchronise S3-compatible buckets into a normalised file-record store"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synchronise all candidate buckets using the given config file
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Only pick up objects modified since the last completed sync
        #[clap(long)]
        incremental: bool,
    },
    /// Re-check every stored file record against the object store
    Reindex {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync {
            config,
            incremental,
        } => {
            let config = load_config(config)?;
            tracing::info!(command = "sync", incremental, "Starting synchronisation run");
            let store = open_store(&config)?;
            let orchestrator = build_orchestrator(&config, store)?;
            let result = if incremental {
                orchestrator.run_incremental_sync().await
            } else {
                orchestrator.run_full_sync().await
            };
            match result {
                Ok(report) => {
                    tracing::info!(command = "sync", ?report, "Synchronisation complete");
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "sync", error = %e, "Synchronisation failed");
                    Err(anyhow::Error::new(e))
                }
            }
        }
        Commands::Reindex { config } => {
            let config = load_config(config)?;
            tracing::info!(command = "reindex", "Starting reindex pass");
            let store = open_store(&config)?;
            let records = store.all_file_records();
            let orchestrator = build_orchestrator(&config, store)?;
            match orchestrator.reindex(records).await {
                Ok(report) => {
                    tracing::info!(command = "reindex", ?report, "Reindex complete");
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "reindex", error = %e, "Reindex failed");
                    Err(anyhow::Error::new(e))
                }
            }
        }
    }
}

fn open_store(config: &CliConfig) -> Result<Arc<LocalRecordStore>> {
    let store = LocalRecordStore::open(&config.output, config.users.clone())?;
    Ok(Arc::new(store))
}

/// Wires the local host implementations into the core orchestrator. The
/// record store serves as both lookup store and sink.
fn build_orchestrator(
    config: &CliConfig,
    store: Arc<LocalRecordStore>,
) -> Result<SyncOrchestrator> {
    let client = Arc::new(LocalBucketClient::new(config.source.root_dir.clone()));
    let sync_points = Arc::new(LocalSyncPointStore::open(
        config.output.sync_points_file.clone(),
    )?);
    let urls = config.source.url_builder()?;
    let orchestrator = SyncOrchestrator::new(
        config.connector.clone(),
        client,
        store.clone(),
        store,
        sync_points,
        urls,
    )?;
    Ok(orchestrator)
}
