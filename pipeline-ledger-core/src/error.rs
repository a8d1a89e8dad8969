//! Error taxonomy for the pipeline core.
//!
//! Collaborator errors ([`StoreError`], [`TransformError`]) are produced by trait
//! implementors. [`ItemFailure`] is recovered per input and ends up in the ledger entry's
//! error list. [`LedgerError`] and [`RunError`] abort (or taint) the run as a whole.

use thiserror::Error;

use crate::synchronise::RunReport;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("path not found: {0}")]
    NotFound(String),
    #[error("path already exists: {0}")]
    AlreadyExists(String),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("transform failed: {0}")]
    Failed(String),
    #[error("transform I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a single input could not be (fully) processed in this run.
#[derive(Error, Debug)]
pub enum ItemFailure {
    #[error("failed to read input {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("output {path} already exists")]
    UploadCollision { path: String },
    #[error("failed to upload {path}: {source}")]
    Upload {
        path: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger at {location} could not be read: {source}")]
    Unreadable {
        location: String,
        #[source]
        source: StoreError,
    },
    #[error("ledger at {location} is corrupt: {source}")]
    Corrupt {
        location: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("ledger could not be serialised: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("ledger at {location} could not be persisted: {source}")]
    Persist {
        location: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Error, Debug)]
pub enum DependencyGraphError {
    #[error("dependency graph could not be serialised: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("dependency graph could not be written to {path}: {source}")]
    Store {
        path: String,
        #[source]
        source: StoreError,
    },
}

/// A job layout that can never run safely.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("job.ledger_path must not be empty")]
    EmptyLedgerPath,
    #[error("job.{key} ({prefix}) equals or contains job.input_prefix ({input_prefix}); every input would be skipped as bookkeeping")]
    InputUnderBookkeeping {
        key: &'static str,
        prefix: String,
        input_prefix: String,
    },
    #[error("job.output_prefix must not be empty when resetting; that would delete the whole store")]
    ResetWithoutOutputPrefix,
}

#[derive(Error, Debug)]
pub enum RunError {
    /// Raised before anything is read or written.
    #[error("invalid job configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to list inputs under {prefix}: {source}")]
    Listing {
        prefix: String,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("failed to reset {path}: {source}")]
    Reset {
        path: String,
        #[source]
        source: StoreError,
    },
    /// Raised after the ledger was persisted; uploaded outputs are not rolled back.
    #[error("run {} finished but its dependency graph was not recorded: {}", .report.run_id, .source)]
    DependencyGraphWrite {
        #[source]
        source: DependencyGraphError,
        report: Box<RunReport>,
    },
}
