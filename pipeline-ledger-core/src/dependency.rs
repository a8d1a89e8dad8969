//! Dependency graph recorder: provenance of which inputs produced which outputs in a run.
//!
//! One edge is recorded per attempted input, successful or not (failed attempts carry an
//! empty output list). The graph is written once at the end of the run under a name that
//! embeds the run id, so successive runs never overwrite each other's record. Nothing in
//! this crate reads it back.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::contract::ContentStore;
use crate::error::DependencyGraphError;
use crate::path::join_path;

/// Identifier of a single run: a millisecond UTC timestamp plus a random suffix, so two runs
/// started within the same millisecond still get distinct names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
        let suffix = Uuid::new_v4().simple().to_string();
        RunId(format!("{timestamp}-{}", &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        RunId(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// A serialised dependency graph, ready to be stored.
#[derive(Debug, Clone)]
pub struct DependencyDocument {
    pub file_name: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Default, Clone)]
pub struct DependencyGraphRecorder {
    edges: Vec<DependencyEdge>,
}

impl DependencyGraphRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one edge. Paths are recorded as given, without checking they exist.
    pub fn add_edge(&mut self, inputs: Vec<String>, outputs: Vec<String>) {
        self.edges.push(DependencyEdge { inputs, outputs });
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn document_name(run_id: &RunId) -> String {
        format!("file_dependencies_{run_id}.json")
    }

    pub fn write(&self, run_id: &RunId) -> Result<DependencyDocument, DependencyGraphError> {
        let content = serde_json::to_vec_pretty(&self.edges)?;
        Ok(DependencyDocument {
            file_name: Self::document_name(run_id),
            content,
        })
    }

    /// Serialise and store the graph under `prefix`, never overwriting an existing document.
    /// Returns the path written.
    pub async fn upload<S>(
        &self,
        store: &S,
        prefix: &str,
        run_id: &RunId,
    ) -> Result<String, DependencyGraphError>
    where
        S: ContentStore + ?Sized,
    {
        let document = self.write(run_id)?;
        let path = join_path(prefix, &document.file_name);
        store
            .write(&path, &document.content, false)
            .await
            .map_err(|source| DependencyGraphError::Store {
                path: path.clone(),
                source,
            })?;
        info!(path = %path, edges = self.edges.len(), "[DEPS] Wrote dependency graph");
        Ok(path)
    }
}
