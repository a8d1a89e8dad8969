//! In-memory [`ContentStore`], for tests and dry runs.
//!
//! Blobs carry an explicit last-modified timestamp so tests can pin the exact mtimes the
//! ledger compares. Listings include synthesised directory entries for every intermediate
//! path segment, like a hierarchical data lake would return.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::contract::{ContentStore, StoreEntry, StoreError};
use crate::path::relative_to;

#[derive(Debug, Clone)]
struct Blob {
    content: Vec<u8>,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<BTreeMap<String, Blob>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> MutexGuard<'_, BTreeMap<String, Blob>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a blob with an explicit mtime.
    pub fn insert(&self, path: &str, content: impl Into<Vec<u8>>, last_modified: DateTime<Utc>) {
        self.blobs().insert(
            path.to_string(),
            Blob {
                content: content.into(),
                last_modified,
            },
        );
    }

    /// Change a blob's mtime without touching its content. Returns false if absent.
    pub fn set_last_modified(&self, path: &str, last_modified: DateTime<Utc>) -> bool {
        match self.blobs().get_mut(path) {
            Some(blob) => {
                blob.last_modified = last_modified;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, path: &str) -> bool {
        self.blobs().remove(path).is_some()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.blobs().contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.blobs().get(path).map(|blob| blob.content.clone())
    }

    /// All blob paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.blobs().keys().cloned().collect()
    }

    /// Blob paths below `prefix`, sorted.
    pub fn paths_under(&self, prefix: &str) -> Vec<String> {
        self.blobs()
            .keys()
            .filter(|path| relative_to(path, prefix).is_some())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn list(&self, prefix: &str) -> Result<Vec<StoreEntry>, StoreError> {
        let blobs = self.blobs();
        let prefix = prefix.trim_end_matches('/');
        let mut directories: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
        let mut files = Vec::new();

        for (path, blob) in blobs.iter() {
            let Some(relative) = relative_to(path, prefix) else {
                continue;
            };
            let segments: Vec<&str> = relative.split('/').collect();
            for depth in 1..segments.len() {
                let dir = segments[..depth].join("/");
                let dir = if prefix.is_empty() {
                    dir
                } else {
                    format!("{prefix}/{dir}")
                };
                directories.entry(dir).or_insert(blob.last_modified);
            }
            files.push(StoreEntry {
                path: path.clone(),
                is_directory: false,
                last_modified: blob.last_modified,
            });
        }

        let mut entries: Vec<StoreEntry> = directories
            .into_iter()
            .map(|(path, last_modified)| StoreEntry {
                path,
                is_directory: true,
                last_modified,
            })
            .collect();
        entries.extend(files);
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        self.get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn write(&self, path: &str, content: &[u8], overwrite: bool) -> Result<(), StoreError> {
        let mut blobs = self.blobs();
        if !overwrite && blobs.contains_key(path) {
            return Err(StoreError::AlreadyExists(path.to_string()));
        }
        blobs.insert(
            path.to_string(),
            Blob {
                content: content.to_vec(),
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        Ok(self.contains(path))
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        if self.remove(path) {
            Ok(())
        } else {
            Err(StoreError::NotFound(path.to_string()))
        }
    }

    async fn delete_directory(&self, path: &str) -> Result<(), StoreError> {
        let mut blobs = self.blobs();
        let doomed: Vec<String> = blobs
            .keys()
            .filter(|blob| relative_to(blob, path).is_some())
            .cloned()
            .collect();
        if doomed.is_empty() {
            return Err(StoreError::NotFound(path.to_string()));
        }
        for blob in doomed {
            blobs.remove(&blob);
        }
        Ok(())
    }

    async fn last_modified(&self, path: &str) -> Result<DateTime<Utc>, StoreError> {
        self.blobs()
            .get(path)
            .map(|blob| blob.last_modified)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }
}
