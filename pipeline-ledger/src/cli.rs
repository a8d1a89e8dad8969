//! # pipeline-ledger CLI interface
//!
//! Command parsing and the async entrypoint for the `pipeline-ledger` binary. All
//! processing logic (ledger, reconciliation, dependency graph) lives in
//! `pipeline-ledger-core`; this module only wires a loaded config to a store and a
//! transformer and prints what happened.
//!
//! - [`Cli`] / [`Commands`]: user-facing options and subcommands
//! - [`run`]: entrypoint shared by `main` and the integration tests
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pipeline_ledger_core::error::RunError;
use pipeline_ledger_core::ledger::Ledger;
use pipeline_ledger_core::synchronise::{synchronise, synchronise_from_scratch, RunReport};

use crate::load_config::{load_config, CliConfig, StoreSection};
use crate::local_store::LocalStore;

/// CLI for pipeline-ledger: incrementally re-derive outputs from changed inputs.
#[derive(Parser)]
#[clap(
    name = "pipeline-ledger",
    version,
    about = "Process new and changed inputs of a content store, cleaning up outputs of removed ones"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the job once: process changed inputs and reconcile removed ones
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Delete every output and the ledger first, so all inputs are processed again
        #[clap(long)]
        reset: bool,
    },
    /// Print the persisted ledger of the job without changing anything
    Inspect {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

fn open_store(config: &CliConfig) -> LocalStore {
    match &config.store {
        StoreSection::Local { root } => LocalStore::new(root.clone()),
    }
}

fn print_report(report: &RunReport) -> Result<()> {
    let rendered = serde_json::to_string_pretty(report).context("Failed to render run report")?;
    println!("{rendered}");
    Ok(())
}

/// Async CLI entrypoint for integration tests and `main()`.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync { config, reset } => {
            let config = load_config(config)?;
            tracing::info!(command = "sync", reset, "Starting synchronisation run");
            let store = open_store(&config);
            let transformer = config.transform.build();

            let result = if reset {
                synchronise_from_scratch(&config.job, &store, transformer.as_ref()).await
            } else {
                synchronise(&config.job, &store, transformer.as_ref()).await
            };
            match result {
                Ok(report) => {
                    tracing::info!(
                        command = "sync",
                        run_id = %report.run_id,
                        processed = report.processed(),
                        failed = report.failed(),
                        "Synchronisation complete"
                    );
                    print_report(&report)
                }
                Err(RunError::DependencyGraphWrite { source, report }) => {
                    tracing::error!(command = "sync", error = %source, "Run finished without a dependency graph");
                    print_report(&report)?;
                    Err(anyhow::Error::new(source).context(format!(
                        "run {} finished but its dependency graph was not recorded",
                        report.run_id
                    )))
                }
                Err(e) => {
                    tracing::error!(command = "sync", error = %e, "Synchronisation failed");
                    Err(anyhow::Error::new(e))
                }
            }
        }
        Commands::Inspect { config } => {
            let config = load_config(config)?;
            let store = open_store(&config);
            let ledger = Ledger::load(&store, &config.job.ledger_path)
                .await
                .context("Failed to load ledger")?;
            tracing::info!(command = "inspect", entries = ledger.len(), "Ledger loaded");

            println!("ledger {} ({} entries)", ledger.location(), ledger.len());
            for entry in ledger.entries() {
                println!("{}", entry.path);
                println!("  last_processed_mtime: {}", entry.last_processed_mtime.to_rfc3339());
                for output in &entry.output_paths {
                    println!("  output: {output}");
                }
                for error in &entry.errors {
                    println!("  error: {error}");
                }
            }
            Ok(())
        }
    }
}
