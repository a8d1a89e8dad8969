//! High-level pipeline: brings a job's outputs in line with its current inputs.
//!
//! This module provides the top-level orchestration for one "run" of a processing job. It:
//!   - Lists every candidate input below the job's input prefix
//!   - Skips inputs matched by the [`IgnoreList`] and inputs the [`Ledger`] says are unchanged
//!   - Reads and transforms the rest through a [`Transformer`], optionally several at a time
//!   - Uploads the outputs, refusing to overwrite anything another input already owns
//!   - Garbage-collects outputs whose input disappeared, then persists the ledger and the
//!     run's dependency graph
//!
//! # Major Types
//! - [`RunReport`]: per-input outcomes plus what reconciliation deleted, for audit
//! - [`ItemOutcome`]: the explicit result of visiting one input
//!
//! # Responsibilities
//! - Per-item failures never abort the run: they are recorded on the ledger entry, reported
//!   and retried on a later run
//! - Ledger load/persist failures abort the run before anything is committed
//! - All ledger mutations happen in the single consuming loop, in discovery order, even when
//!   transforms run concurrently; a transform never touches the ledger or the store
//!
//! # Navigation
//! - Main entrypoint: [`synchronise`]
//! - Clean-slate variant: [`synchronise_from_scratch`], which drops all outputs and the
//!   ledger first so every input is processed again

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::JobConfig;
use crate::contract::{ContentStore, StoreEntry, StoreError, TransformInput, TransformedOutput, Transformer};
use crate::dependency::{DependencyGraphRecorder, RunId};
use crate::error::{ConfigError, ItemFailure, RunError};
use crate::ignore::IgnoreList;
use crate::ledger::Ledger;
use crate::path::{join_path, relative_to};
use crate::progress::{Estimate, ProgressEstimator};

/// What happened to one input during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Ignored,
    Unchanged,
    Processed {
        outputs: Vec<String>,
    },
    /// `outputs` holds whatever was uploaded before the item failed; those are tracked by
    /// the ledger and cleaned up on the next attempt.
    Failed {
        errors: Vec<String>,
        outputs: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub path: String,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub items: Vec<ItemReport>,
    pub deleted_outputs: Vec<String>,
    pub removed_entries: Vec<String>,
    pub retained_entries: Vec<String>,
    /// Store path of this run's dependency graph, once written.
    pub dependency_graph: Option<String>,
}

impl RunReport {
    pub fn outcome(&self, path: &str) -> Option<&ItemOutcome> {
        self.items
            .iter()
            .find(|item| item.path == path)
            .map(|item| &item.outcome)
    }

    pub fn processed(&self) -> usize {
        self.count(|outcome| matches!(outcome, ItemOutcome::Processed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, ItemOutcome::Failed { .. }))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|outcome| matches!(outcome, ItemOutcome::Unchanged))
    }

    pub fn ignored(&self) -> usize {
        self.count(|outcome| matches!(outcome, ItemOutcome::Ignored))
    }

    fn count(&self, predicate: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|item| predicate(&item.outcome)).count()
    }
}

/// An input the ledger decided to (re)process.
#[derive(Debug)]
struct PendingInput {
    slot: usize,
    path: String,
    relative_path: String,
    last_modified: DateTime<Utc>,
}

/// Run the job described by `config` once.
pub async fn synchronise<S, T>(
    config: &JobConfig,
    store: &S,
    transformer: &T,
) -> Result<RunReport, RunError>
where
    S: ContentStore + ?Sized,
    T: Transformer + ?Sized,
{
    let run_id = RunId::generate();
    let span = info_span!("synchronise", run_id = %run_id);
    run(config, store, transformer, run_id).instrument(span).await
}

/// Delete every output and the ledger, then run the job.
///
/// Dependency documents and status reports of earlier runs are kept.
pub async fn synchronise_from_scratch<S, T>(
    config: &JobConfig,
    store: &S,
    transformer: &T,
) -> Result<RunReport, RunError>
where
    S: ContentStore + ?Sized,
    T: Transformer + ?Sized,
{
    config.validate()?;
    reset(config, store).await?;
    synchronise(config, store, transformer).await
}

/// Remove the output prefix and the ledger document. Paths already absent count as removed.
pub async fn reset<S>(config: &JobConfig, store: &S) -> Result<(), RunError>
where
    S: ContentStore + ?Sized,
{
    if config.output_prefix.trim_matches('/').is_empty() {
        return Err(ConfigError::ResetWithoutOutputPrefix.into());
    }

    warn!(output_prefix = %config.output_prefix, ledger = %config.ledger_path, "[SYNC] Resetting job, all outputs will be rebuilt");
    match store.delete_directory(&config.output_prefix).await {
        Ok(()) => info!(output_prefix = %config.output_prefix, "[SYNC] Deleted output prefix"),
        Err(e) if e.is_not_found() => {
            debug!(output_prefix = %config.output_prefix, "[SYNC] Output prefix already absent")
        }
        Err(source) => {
            error!(output_prefix = %config.output_prefix, error = %source, "[SYNC][ERROR] Failed to delete outputs");
            return Err(RunError::Reset {
                path: config.output_prefix.clone(),
                source,
            });
        }
    }

    match store.delete(&config.ledger_path).await {
        Ok(()) => info!(ledger = %config.ledger_path, "[SYNC] Deleted ledger"),
        Err(e) if e.is_not_found() => {}
        Err(source) => {
            error!(ledger = %config.ledger_path, error = %source, "[SYNC][ERROR] Failed to delete ledger");
            return Err(RunError::Reset {
                path: config.ledger_path.clone(),
                source,
            });
        }
    }
    Ok(())
}

async fn run<S, T>(
    config: &JobConfig,
    store: &S,
    transformer: &T,
    run_id: RunId,
) -> Result<RunReport, RunError>
where
    S: ContentStore + ?Sized,
    T: Transformer + ?Sized,
{
    info!(input_prefix = %config.input_prefix, "[SYNC] Starting run");

    config.validate().map_err(|e| {
        error!(error = %e, "[SYNC][ERROR] Refusing to run with this job layout");
        RunError::Config(e)
    })?;

    // A corrupt or unreadable ledger aborts here, before any store mutation.
    let mut ledger = Ledger::load(store, &config.ledger_path).await?;
    ledger.reset_seen_flags();

    let ignore = match &config.ignore_path {
        Some(path) => IgnoreList::load(store, path).await,
        None => IgnoreList::empty(),
    };

    let inputs = discover_inputs(store, config).await?;
    info!(inputs = inputs.len(), "[SYNC] Discovered inputs");

    let estimator = ProgressEstimator::new(inputs.len());
    let mut graph = DependencyGraphRecorder::new();
    let mut slots: Vec<Option<ItemReport>> = vec![None; inputs.len()];
    let mut pending = Vec::new();

    // --- Step 1: decide per input, in discovery order ---
    for (slot, input) in inputs.into_iter().enumerate() {
        if ignore.is_ignored(&input.path) {
            info!(path = %input.path, "[SYNC] Ignoring input");
            slots[slot] = Some(ItemReport {
                path: input.path,
                outcome: ItemOutcome::Ignored,
            });
            log_progress(estimator.step());
            continue;
        }

        let changed = ledger.should_process(&input.path, input.last_modified);
        let retry = !changed && config.retry_failed && ledger.needs_retry(&input.path);
        if !changed && !retry {
            debug!(path = %input.path, "[SYNC] Input unchanged since last run, skipping");
            ledger.mark_seen(&input.path);
            slots[slot] = Some(ItemReport {
                path: input.path,
                outcome: ItemOutcome::Unchanged,
            });
            log_progress(estimator.step());
            continue;
        }
        if retry {
            info!(path = %input.path, "[SYNC] Retrying input that failed last run");
        }

        let relative_path = relative_to(&input.path, &config.input_prefix)
            .unwrap_or(&input.path)
            .to_string();
        pending.push(PendingInput {
            slot,
            path: input.path,
            relative_path,
            last_modified: input.last_modified,
        });
    }

    // --- Step 2: read + transform (possibly concurrently), apply results one at a time ---
    let concurrency = config.max_concurrency.max(1);
    let mut results = stream::iter(pending)
        .map(move |input| async move {
            let result = fetch_and_transform(store, transformer, &input).await;
            (input, result)
        })
        .buffered(concurrency);

    while let Some((input, result)) = results.next().await {
        let outcome = apply_result(&mut ledger, &mut graph, store, config, &input, result).await;
        slots[input.slot] = Some(ItemReport {
            path: input.path,
            outcome,
        });
        log_progress(estimator.step());
    }

    // --- Step 3: reconcile and commit ---
    let summary = ledger.reconcile_stale_entries(store).await;
    ledger.reset_seen_flags();
    ledger.persist(store).await?;

    let mut report = RunReport {
        run_id: run_id.clone(),
        items: slots.into_iter().flatten().collect(),
        deleted_outputs: summary.deleted_outputs,
        removed_entries: summary.removed_entries,
        retained_entries: summary.retained_entries,
        dependency_graph: None,
    };

    match graph.upload(store, &config.dependency_prefix, &run_id).await {
        Ok(path) => report.dependency_graph = Some(path),
        Err(source) => {
            error!(error = %source, "[SYNC][ERROR] Failed to record dependency graph");
            write_status_report(store, config, &report).await;
            return Err(RunError::DependencyGraphWrite {
                source,
                report: Box::new(report),
            });
        }
    }

    write_status_report(store, config, &report).await;

    info!(
        processed = report.processed(),
        failed = report.failed(),
        unchanged = report.unchanged(),
        ignored = report.ignored(),
        deleted_outputs = report.deleted_outputs.len(),
        "[SYNC] Run complete"
    );
    Ok(report)
}

/// List candidate inputs: files below the input prefix that pass the extension filter and
/// are not the job's own bookkeeping or outputs.
async fn discover_inputs<S>(store: &S, config: &JobConfig) -> Result<Vec<StoreEntry>, RunError>
where
    S: ContentStore + ?Sized,
{
    let listing = store
        .list(&config.input_prefix)
        .await
        .map_err(|source| {
            error!(prefix = %config.input_prefix, error = %source, "[SYNC][ERROR] Failed to list inputs");
            RunError::Listing {
                prefix: config.input_prefix.clone(),
                source,
            }
        })?;

    Ok(listing
        .into_iter()
        .filter(|entry| !entry.is_directory)
        .filter(|entry| config.accepts_extension(&entry.path))
        .filter(|entry| !is_bookkeeping(config, &entry.path))
        .collect())
}

fn is_bookkeeping(config: &JobConfig, path: &str) -> bool {
    if path == config.ledger_path {
        return true;
    }
    if config.ignore_path.as_deref() == Some(path) {
        return true;
    }
    let under =
        |prefix: &str| !prefix.trim_matches('/').is_empty() && relative_to(path, prefix).is_some();
    under(&config.output_prefix)
        || under(&config.dependency_prefix)
        || config.report_prefix.as_deref().map(under).unwrap_or(false)
}

async fn fetch_and_transform<S, T>(
    store: &S,
    transformer: &T,
    input: &PendingInput,
) -> Result<Vec<TransformedOutput>, ItemFailure>
where
    S: ContentStore + ?Sized,
    T: Transformer + ?Sized,
{
    debug!(path = %input.path, "[SYNC] Reading input");
    let content = store
        .read(&input.path)
        .await
        .map_err(|source| ItemFailure::Read {
            path: input.path.clone(),
            source,
        })?;

    let outputs = transformer
        .transform(TransformInput {
            path: input.path.clone(),
            relative_path: input.relative_path.clone(),
            last_modified: input.last_modified,
            content,
        })
        .await?;
    debug!(path = %input.path, outputs = outputs.len(), "[SYNC] Transform finished");
    Ok(outputs)
}

async fn apply_result<S>(
    ledger: &mut Ledger,
    graph: &mut DependencyGraphRecorder,
    store: &S,
    config: &JobConfig,
    input: &PendingInput,
    result: Result<Vec<TransformedOutput>, ItemFailure>,
) -> ItemOutcome
where
    S: ContentStore + ?Sized,
{
    let path = input.path.as_str();
    ledger.begin_attempt(path, input.last_modified);

    let outputs = match result {
        Ok(outputs) => outputs,
        Err(failure) => {
            error!(path, error = %failure, "[SYNC][ERROR] Input failed, keeping previous outputs");
            ledger.append_error(path, failure.to_string());
            return record_failure(ledger, graph, path);
        }
    };

    let cleanup = ledger.delete_stale_outputs_before_retry(store, path).await;
    if !cleanup.is_complete() {
        error!(path, retained = cleanup.retained.len(), "[SYNC][ERROR] Stale outputs could not be removed, not uploading");
        return record_failure(ledger, graph, path);
    }

    let (uploaded, failures) = upload_outputs(store, config, outputs).await;
    for failure in &failures {
        error!(path, error = %failure, "[SYNC][ERROR] Output upload failed");
        ledger.append_error(path, failure.to_string());
    }

    ledger.confirm(path, uploaded.clone(), input.last_modified);
    graph.add_edge(vec![path.to_string()], uploaded.clone());

    if failures.is_empty() {
        info!(path, outputs = uploaded.len(), "[SYNC] Input processed");
        ItemOutcome::Processed { outputs: uploaded }
    } else {
        ItemOutcome::Failed {
            errors: failures.iter().map(ToString::to_string).collect(),
            outputs: uploaded,
        }
    }
}

/// Failed attempts still count as seen, so the previous outputs survive reconciliation.
fn record_failure(ledger: &mut Ledger, graph: &mut DependencyGraphRecorder, path: &str) -> ItemOutcome {
    ledger.mark_seen(path);
    graph.add_edge(vec![path.to_string()], Vec::new());
    let entry = ledger.get(path);
    debug!(
        path,
        kept_outputs = entry.map(|entry| entry.output_paths.len()).unwrap_or(0),
        "[SYNC] Failure recorded"
    );
    ItemOutcome::Failed {
        errors: entry.map(|entry| entry.errors.clone()).unwrap_or_default(),
        outputs: Vec::new(),
    }
}

/// Upload every output, never overwriting. Any collision, with another input's output or
/// between two outputs of this one, fails that output and therefore the item.
async fn upload_outputs<S>(
    store: &S,
    config: &JobConfig,
    outputs: Vec<TransformedOutput>,
) -> (Vec<String>, Vec<ItemFailure>)
where
    S: ContentStore + ?Sized,
{
    let mut uploaded = Vec::with_capacity(outputs.len());
    let mut failures = Vec::new();
    let mut claimed = HashSet::new();

    for output in outputs {
        let destination = join_path(&config.output_prefix, &output.relative_path);
        if !claimed.insert(destination.clone()) {
            failures.push(ItemFailure::UploadCollision { path: destination });
            continue;
        }

        match store.exists(&destination).await {
            Ok(false) => {}
            Ok(true) => {
                warn!(output = %destination, "[SYNC] Output already exists, refusing to overwrite");
                failures.push(ItemFailure::UploadCollision { path: destination });
                continue;
            }
            Err(source) => {
                failures.push(ItemFailure::Upload {
                    path: destination,
                    source,
                });
                continue;
            }
        }

        match store.write(&destination, &output.content, false).await {
            Ok(()) => {
                debug!(output = %destination, size = output.content.len(), "[SYNC] Uploaded output");
                uploaded.push(destination);
            }
            Err(StoreError::AlreadyExists(_)) => {
                failures.push(ItemFailure::UploadCollision { path: destination });
            }
            Err(source) => failures.push(ItemFailure::Upload {
                path: destination,
                source,
            }),
        }
    }

    (uploaded, failures)
}

async fn write_status_report<S>(store: &S, config: &JobConfig, report: &RunReport)
where
    S: ContentStore + ?Sized,
{
    let Some(prefix) = &config.report_prefix else {
        return;
    };
    let path = join_path(prefix, &format!("status_report_{}.json", report.run_id));
    let document = match serde_json::to_vec_pretty(report) {
        Ok(document) => document,
        Err(e) => {
            warn!(error = %e, "[SYNC] Failed to serialise status report");
            return;
        }
    };
    match store.write(&path, &document, false).await {
        Ok(()) => info!(path = %path, "[SYNC] Wrote status report"),
        Err(e) => warn!(path = %path, error = %e, "[SYNC] Failed to write status report"),
    }
}

fn log_progress(estimate: Estimate) {
    info!(
        completed = estimate.completed,
        total = estimate.total,
        remaining_secs = estimate.remaining.as_secs(),
        "[SYNC] {}",
        estimate
    );
}
