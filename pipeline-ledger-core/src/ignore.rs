//! Ignore list: inputs a job must never process, loaded once per run.
//!
//! The document is line-delimited. Blank lines and `#` comments are skipped. A line that
//! contains a glob metacharacter is compiled as a [globset](https://docs.rs/globset) pattern
//! and matched against the full input path; every other line is an exact path.
//!
//! Loading fails open: when the document is missing or cannot be read, the run proceeds
//! with an empty list. A missing ignore file must never block a run; the fallback is logged
//! at `warn` so it does not go unnoticed.

use std::collections::HashSet;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info, warn};

use crate::contract::ContentStore;

const GLOB_METACHARACTERS: &[char] = &['*', '?', '[', '{'];

#[derive(Debug, Clone)]
pub struct IgnoreList {
    exact: HashSet<String>,
    patterns: GlobSet,
}

impl Default for IgnoreList {
    fn default() -> Self {
        Self::empty()
    }
}

impl IgnoreList {
    /// A list that ignores nothing.
    pub fn empty() -> Self {
        Self {
            exact: HashSet::new(),
            patterns: GlobSet::empty(),
        }
    }

    /// Parse an ignore document. Invalid glob lines are skipped with a warning.
    pub fn parse(text: &str) -> Self {
        let mut exact = HashSet::new();
        let mut builder = GlobSetBuilder::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.contains(GLOB_METACHARACTERS) {
                match Glob::new(line) {
                    Ok(glob) => {
                        builder.add(glob);
                    }
                    Err(e) => {
                        warn!(pattern = line, error = %e, "[IGNORE] Skipping invalid ignore pattern");
                    }
                }
            } else {
                exact.insert(line.to_string());
            }
        }

        let patterns = builder.build().unwrap_or_else(|e| {
            warn!(error = %e, "[IGNORE] Failed to compile ignore patterns, only exact paths apply");
            GlobSet::empty()
        });

        Self { exact, patterns }
    }

    /// Load the ignore document at `path`, failing open to an empty list.
    pub async fn load<S>(store: &S, path: &str) -> Self
    where
        S: ContentStore + ?Sized,
    {
        match store.read(path).await {
            Ok(bytes) => {
                let list = Self::parse(&String::from_utf8_lossy(&bytes));
                info!(
                    ignore_path = path,
                    exact = list.exact.len(),
                    patterns = list.patterns.len(),
                    "[IGNORE] Loaded ignore list"
                );
                list
            }
            Err(e) if e.is_not_found() => {
                warn!(ignore_path = path, "[IGNORE] No ignore list found, ignoring nothing");
                Self::empty()
            }
            Err(e) => {
                warn!(ignore_path = path, error = %e, "[IGNORE] Ignore list unreadable, ignoring nothing");
                Self::empty()
            }
        }
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        let ignored = self.exact.contains(path) || self.patterns.is_match(path);
        if ignored {
            debug!(path, "[IGNORE] Path matches ignore list");
        }
        ignored
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.patterns.is_empty()
    }
}
