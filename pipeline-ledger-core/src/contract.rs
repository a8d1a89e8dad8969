//! # contract: the two collaborators the pipeline core is written against
//!
//! This module defines the traits the orchestration in [`crate::synchronise`]
//! consumes but never implements itself:
//!
//! - [`ContentStore`]: primitive list/read/write/delete/exists/stat operations over
//!   hierarchical, `/`-separated paths (a blob container, a data lake, a local directory).
//! - [`Transformer`]: the opaque domain transformation mapping one input artifact to zero
//!   or more output artifacts, or a failure.
//!
//! ## Mocking & Testing
//! - Both traits are annotated for `mockall` so consumers can generate deterministic mocks
//!   (`MockContentStore`, `MockTransformer`) for unit/integration tests.
//! - For scenario tests that need a store with real state, see [`crate::memory::MemoryStore`].
//!
//! ## Adding New Store Backends
//! - Implement [`ContentStore`] for your backend.
//! - Map "path does not exist" to [`StoreError::NotFound`] and "refusing to overwrite" to
//!   [`StoreError::AlreadyExists`]; the ledger relies on both to tell benign outcomes apart
//!   from real failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

pub use crate::error::{StoreError, TransformError};

/// One row of a store listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    /// Full path of the blob or directory, relative to the store root.
    pub path: String,
    pub is_directory: bool,
    /// Last modification time as reported by the store.
    pub last_modified: DateTime<Utc>,
}

/// Everything a transformer gets to see about one input.
#[derive(Debug, Clone)]
pub struct TransformInput {
    /// Full store path of the input.
    pub path: String,
    /// Input path relative to the job's input prefix (never starts with `/`).
    pub relative_path: String,
    pub last_modified: DateTime<Utc>,
    /// Raw bytes downloaded from the store.
    pub content: Vec<u8>,
}

/// One artifact produced by a transform, not yet uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedOutput {
    /// Destination relative to the job's output prefix.
    pub relative_path: String,
    pub content: Vec<u8>,
}

/// Primitive operations over a remote (or local) content store.
///
/// Paths are `/`-separated and relative to the store root. `list` is recursive.
///
/// The trait is `Send` + `Sync` and intended for async/await usage; implementors are
/// responsible for their own transport, retries and timeouts.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// List every entry below `prefix`, recursively.
    async fn list(&self, prefix: &str) -> Result<Vec<StoreEntry>, StoreError>;

    /// Read the full content of a blob.
    async fn read(&self, path: &str) -> Result<Vec<u8>, StoreError>;

    /// Write a blob. With `overwrite == false` an existing blob must be left untouched and
    /// [`StoreError::AlreadyExists`] returned. With `overwrite == true` the blob must be
    /// replaced atomically: readers see either the previous content or the new content, and
    /// a failed write leaves the previous content in place.
    async fn write(&self, path: &str, content: &[u8], overwrite: bool) -> Result<(), StoreError>;

    async fn exists(&self, path: &str) -> Result<bool, StoreError>;

    /// Delete a single blob.
    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// Delete a directory and everything below it.
    async fn delete_directory(&self, path: &str) -> Result<(), StoreError>;

    /// Last modification time of a single blob.
    async fn last_modified(&self, path: &str) -> Result<DateTime<Utc>, StoreError>;
}

/// The domain transformation applied to every input that needs (re)processing.
///
/// Implementations must not touch the store: they receive the input bytes and return the
/// outputs, and the orchestrator takes care of uploading, collision checks and bookkeeping.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(
        &self,
        input: TransformInput,
    ) -> Result<Vec<TransformedOutput>, TransformError>;
}
