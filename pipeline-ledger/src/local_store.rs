//! `local_store`: a [`ContentStore`] backed by a directory on the local filesystem.
//!
//! Store paths are `/`-separated and resolved below the configured root. Listings walk the
//! tree recursively and report file modification times, which is what the ledger compares
//! against between runs.
//!
//! # Write semantics
//! - `overwrite = false` opens with create-new, so an existing file is reported as
//!   [`StoreError::AlreadyExists`] without being touched
//! - `overwrite = true` writes a sibling temp file and renames it into place, so readers
//!   never see a half-written document

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipeline_ledger_core::contract::{ContentStore, StoreEntry, StoreError};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a store path onto the filesystem, refusing anything that would escape the root.
    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(StoreError::Backend(format!(
                "path {path:?} is not a plain relative store path"
            )));
        }
        Ok(self.root.join(relative))
    }

    /// Inverse of [`resolve`](Self::resolve) for paths found while walking the tree.
    fn store_path(&self, file: &Path) -> Option<String> {
        let relative = file.strip_prefix(&self.root).ok()?;
        let segments: Vec<&str> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect();
        Some(segments.join("/"))
    }
}

fn map_io(path: &str, source: io::Error) -> StoreError {
    match source.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound(path.to_string()),
        io::ErrorKind::AlreadyExists => StoreError::AlreadyExists(path.to_string()),
        _ => StoreError::Io {
            path: path.to_string(),
            source,
        },
    }
}

fn modified(path: &str, metadata: &std::fs::Metadata) -> Result<DateTime<Utc>, StoreError> {
    metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .map_err(|e| map_io(path, e))
}

async fn ensure_parent(path: &str, target: &Path) -> Result<(), StoreError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| map_io(path, e))?;
    }
    Ok(())
}

#[async_trait]
impl ContentStore for LocalStore {
    async fn list(&self, prefix: &str) -> Result<Vec<StoreEntry>, StoreError> {
        let start = self.resolve(prefix)?;
        let metadata = fs::metadata(&start).await.map_err(|e| map_io(prefix, e))?;
        if !metadata.is_dir() {
            return Err(StoreError::Backend(format!("{prefix} is not a directory")));
        }

        let mut entries = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut reader = fs::read_dir(&dir).await.map_err(|e| map_io(prefix, e))?;
            while let Some(child) = reader.next_entry().await.map_err(|e| map_io(prefix, e))? {
                let child_path = child.path();
                let Some(path) = self.store_path(&child_path) else {
                    warn!(path = ?child_path, "[STORE] Skipping path that is not valid UTF-8");
                    continue;
                };
                let metadata = child.metadata().await.map_err(|e| map_io(&path, e))?;
                let last_modified = modified(&path, &metadata)?;
                if metadata.is_dir() {
                    pending.push(child_path);
                }
                entries.push(StoreEntry {
                    path,
                    is_directory: metadata.is_dir(),
                    last_modified,
                });
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(prefix, entries = entries.len(), "[STORE] Listed prefix");
        Ok(entries)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let target = self.resolve(path)?;
        fs::read(&target).await.map_err(|e| map_io(path, e))
    }

    async fn write(&self, path: &str, content: &[u8], overwrite: bool) -> Result<(), StoreError> {
        let target = self.resolve(path)?;
        ensure_parent(path, &target).await?;

        if !overwrite {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)
                .await
                .map_err(|e| map_io(path, e))?;
            file.write_all(content).await.map_err(|e| map_io(path, e))?;
            file.flush().await.map_err(|e| map_io(path, e))?;
            debug!(path, size = content.len(), "[STORE] Created file");
            return Ok(());
        }

        let file_name = target
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("blob");
        let staging = target.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));
        fs::write(&staging, content)
            .await
            .map_err(|e| map_io(path, e))?;
        if let Err(e) = fs::rename(&staging, &target).await {
            let _ = fs::remove_file(&staging).await;
            return Err(map_io(path, e));
        }
        debug!(path, size = content.len(), "[STORE] Replaced file");
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        let target = self.resolve(path)?;
        fs::try_exists(&target).await.map_err(|e| map_io(path, e))
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let target = self.resolve(path)?;
        fs::remove_file(&target).await.map_err(|e| map_io(path, e))?;
        debug!(path, "[STORE] Deleted file");
        Ok(())
    }

    async fn delete_directory(&self, path: &str) -> Result<(), StoreError> {
        let target = self.resolve(path)?;
        fs::remove_dir_all(&target)
            .await
            .map_err(|e| map_io(path, e))?;
        debug!(path, "[STORE] Deleted directory");
        Ok(())
    }

    async fn last_modified(&self, path: &str) -> Result<DateTime<Utc>, StoreError> {
        let target = self.resolve(path)?;
        let metadata = fs::metadata(&target).await.map_err(|e| map_io(path, e))?;
        modified(path, &metadata)
    }
}
