//! Processing ledger: the durable record of which outputs belong to which input.
//!
//! The ledger drives every skip/process decision and the garbage collection of outputs
//! whose input disappeared or changed shape. It is loaded once at the start of a run,
//! mutated through `&mut self` while the run visits inputs, and persisted once at the end.
//!
//! # Lifecycle of an entry within a run
//! 1. [`Ledger::should_process`] compares the input's current mtime with the recorded one.
//! 2. Unchanged inputs are [`Ledger::mark_seen`]; changed ones go through
//!    [`Ledger::begin_attempt`], then either [`Ledger::append_error`] + `mark_seen` on failure,
//!    or [`Ledger::delete_stale_outputs_before_retry`] + upload + [`Ledger::confirm`] on success.
//! 3. [`Ledger::reconcile_stale_entries`] deletes the outputs of every entry not seen this
//!    run and drops the entry, then [`Ledger::reset_seen_flags`] and [`Ledger::persist`].
//!
//! # Document format
//! A JSON object keyed by input path:
//! ```json
//! { "site/a.zip": { "last_processed_mtime": "2024-05-01T10:00:00Z",
//!                   "output_paths": ["out/site/a.json"], "errors": [] } }
//! ```
//! The `seen` flag is transient and never written.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::contract::{ContentStore, StoreError};
use crate::error::LedgerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Input path; this is the key of the persisted map, so it is not repeated in the value.
    #[serde(skip)]
    pub path: String,
    pub last_processed_mtime: DateTime<Utc>,
    #[serde(default)]
    pub output_paths: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(skip)]
    pub seen: bool,
}

impl LedgerEntry {
    fn new(path: &str, last_processed_mtime: DateTime<Utc>) -> Self {
        Self {
            path: path.to_string(),
            last_processed_mtime,
            output_paths: Vec::new(),
            errors: Vec::new(),
            seen: false,
        }
    }
}

/// Outcome of [`Ledger::delete_stale_outputs_before_retry`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StaleCleanup {
    pub deleted: Vec<String>,
    /// Outputs that could not be deleted; they stay recorded on the entry.
    pub retained: Vec<String>,
}

impl StaleCleanup {
    pub fn is_complete(&self) -> bool {
        self.retained.is_empty()
    }
}

/// Outcome of [`Ledger::reconcile_stale_entries`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub deleted_outputs: Vec<String>,
    pub removed_entries: Vec<String>,
    /// Unseen entries kept because some of their outputs could not be deleted.
    pub retained_entries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    location: String,
    entries: BTreeMap<String, LedgerEntry>,
}

impl Ledger {
    pub fn empty(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Read the ledger persisted at `location`. A missing document yields an empty ledger.
    pub async fn load<S>(store: &S, location: &str) -> Result<Self, LedgerError>
    where
        S: ContentStore + ?Sized,
    {
        let bytes = match store.read(location).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                info!(ledger = location, "[LEDGER] No ledger found, starting empty");
                return Ok(Self::empty(location));
            }
            Err(source) => {
                error!(ledger = location, error = %source, "[LEDGER] Failed to read ledger");
                return Err(LedgerError::Unreadable {
                    location: location.to_string(),
                    source,
                });
            }
        };
        let ledger = Self::from_document(location, &bytes)?;
        info!(ledger = location, entries = ledger.len(), "[LEDGER] Loaded ledger");
        Ok(ledger)
    }

    pub fn from_document(location: &str, bytes: &[u8]) -> Result<Self, LedgerError> {
        let mut entries: BTreeMap<String, LedgerEntry> =
            serde_json::from_slice(bytes).map_err(|source| {
                error!(ledger = location, error = %source, "[LEDGER] Ledger document is malformed");
                LedgerError::Corrupt {
                    location: location.to_string(),
                    source,
                }
            })?;
        for (path, entry) in entries.iter_mut() {
            entry.path = path.clone();
            entry.seen = false;
        }
        Ok(Self {
            location: location.to_string(),
            entries,
        })
    }

    pub fn to_document(&self) -> Result<Vec<u8>, LedgerError> {
        serde_json::to_vec_pretty(&self.entries).map_err(LedgerError::Serialize)
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn get(&self, path: &str) -> Option<&LedgerEntry> {
        self.entries.get(path)
    }

    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when `path` has never been processed or its mtime is strictly newer than the
    /// recorded one. Equal timestamps skip.
    pub fn should_process(&self, path: &str, current_mtime: DateTime<Utc>) -> bool {
        match self.entries.get(path) {
            None => true,
            Some(entry) => current_mtime > entry.last_processed_mtime,
        }
    }

    /// True when the last attempt for `path` left errors behind.
    pub fn needs_retry(&self, path: &str) -> bool {
        self.entries
            .get(path)
            .map(|entry| !entry.errors.is_empty())
            .unwrap_or(false)
    }

    /// Upsert the entry for a new attempt: record the mtime being processed and clear the
    /// previous attempt's errors. Does not mark the entry seen.
    pub fn begin_attempt(&mut self, path: &str, current_mtime: DateTime<Utc>) {
        let entry = self
            .entries
            .entry(path.to_string())
            .or_insert_with(|| LedgerEntry::new(path, current_mtime));
        entry.last_processed_mtime = current_mtime;
        entry.errors.clear();
        debug!(path, mtime = %current_mtime, "[LEDGER] Attempt started");
    }

    pub fn append_error(&mut self, path: &str, message: impl Into<String>) {
        match self.entries.get_mut(path) {
            Some(entry) => entry.errors.push(message.into()),
            None => {
                warn!(path, "[LEDGER] Dropping error for path without ledger entry");
            }
        }
    }

    /// Mark `path` as visited this run without touching its outputs.
    pub fn mark_seen(&mut self, path: &str) {
        if let Some(entry) = self.entries.get_mut(path) {
            entry.seen = true;
        }
    }

    /// Delete every output currently recorded for `path` so a rerun that produces a
    /// different output set leaves nothing orphaned. Outputs that are already gone count
    /// as deleted; any other failure is appended to the entry's errors and the output stays
    /// recorded.
    pub async fn delete_stale_outputs_before_retry<S>(
        &mut self,
        store: &S,
        path: &str,
    ) -> StaleCleanup
    where
        S: ContentStore + ?Sized,
    {
        let mut cleanup = StaleCleanup::default();
        let Some(entry) = self.entries.get_mut(path) else {
            return cleanup;
        };

        for output in std::mem::take(&mut entry.output_paths) {
            match delete_output(store, &output).await {
                Ok(()) => cleanup.deleted.push(output),
                Err(e) => {
                    warn!(path, output = %output, error = %e, "[LEDGER] Failed to delete stale output");
                    entry
                        .errors
                        .push(format!("failed to delete stale output {output}: {e}"));
                    cleanup.retained.push(output);
                }
            }
        }
        entry.output_paths = cleanup.retained.clone();

        if !cleanup.deleted.is_empty() {
            info!(path, deleted = cleanup.deleted.len(), "[LEDGER] Deleted stale outputs before retry");
        }
        cleanup
    }

    /// Record the outputs durably written for `path` and mark it seen.
    pub fn confirm(&mut self, path: &str, new_output_paths: Vec<String>, current_mtime: DateTime<Utc>) {
        let entry = self
            .entries
            .entry(path.to_string())
            .or_insert_with(|| LedgerEntry::new(path, current_mtime));
        entry.output_paths = new_output_paths;
        entry.last_processed_mtime = current_mtime;
        entry.seen = true;
        debug!(path, outputs = entry.output_paths.len(), "[LEDGER] Outputs confirmed");
    }

    /// Garbage-collect every entry not seen this run: delete its outputs and drop it.
    ///
    /// An entry whose outputs cannot all be deleted is kept with just the undeleted ones,
    /// so the next run tries again instead of forgetting them.
    pub async fn reconcile_stale_entries<S>(&mut self, store: &S) -> ReconcileSummary
    where
        S: ContentStore + ?Sized,
    {
        let mut summary = ReconcileSummary::default();
        let stale: Vec<String> = self
            .entries
            .values()
            .filter(|entry| !entry.seen)
            .map(|entry| entry.path.clone())
            .collect();

        for path in stale {
            let Some(mut entry) = self.entries.remove(&path) else {
                continue;
            };

            let mut remaining = Vec::new();
            for output in std::mem::take(&mut entry.output_paths) {
                match delete_output(store, &output).await {
                    Ok(()) => summary.deleted_outputs.push(output),
                    Err(e) => {
                        warn!(path = %path, output = %output, error = %e, "[LEDGER] Failed to delete orphaned output");
                        remaining.push(output);
                    }
                }
            }

            if remaining.is_empty() {
                info!(path = %path, "[LEDGER] Removed entry for input no longer present");
                summary.removed_entries.push(path);
            } else {
                entry.output_paths = remaining;
                self.entries.insert(path.clone(), entry);
                summary.retained_entries.push(path);
            }
        }

        info!(
            deleted_outputs = summary.deleted_outputs.len(),
            removed_entries = summary.removed_entries.len(),
            retained_entries = summary.retained_entries.len(),
            "[LEDGER] Reconciliation complete"
        );
        summary
    }

    pub fn reset_seen_flags(&mut self) {
        for entry in self.entries.values_mut() {
            entry.seen = false;
        }
    }

    /// Replace the durable ledger with this one, all or nothing.
    ///
    /// The document is serialised fully before the store is touched, then written with
    /// `overwrite = true`, which every [`ContentStore`] must apply atomically. A
    /// serialisation or write failure leaves the previous ledger in place.
    pub async fn persist<S>(&self, store: &S) -> Result<(), LedgerError>
    where
        S: ContentStore + ?Sized,
    {
        let document = self.to_document()?;
        store
            .write(&self.location, &document, true)
            .await
            .map_err(|source| {
                error!(ledger = %self.location, error = %source, "[LEDGER] Failed to persist ledger");
                LedgerError::Persist {
                    location: self.location.clone(),
                    source,
                }
            })?;
        info!(ledger = %self.location, entries = self.len(), "[LEDGER] Persisted ledger");
        Ok(())
    }
}

async fn delete_output<S>(store: &S, path: &str) -> Result<(), StoreError>
where
    S: ContentStore + ?Sized,
{
    match store.delete(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => {
            debug!(output = path, "[LEDGER] Output already absent");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
