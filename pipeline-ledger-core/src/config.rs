//! Job configuration: where a job finds its inputs and keeps its outputs and bookkeeping.
//!
//! [`JobConfig::validate`] rejects layouts where discovery would filter out every input,
//! since reconciliation would then delete every output.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::path::relative_to;

/// Where one processing job reads, writes and keeps its bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Every file listed below this prefix is a candidate input.
    pub input_prefix: String,
    /// Transform outputs are written below this prefix.
    pub output_prefix: String,
    /// Location of the persisted ledger document.
    pub ledger_path: String,
    /// Dependency graphs are written below this prefix, one per run.
    pub dependency_prefix: String,
    #[serde(default)]
    pub ignore_path: Option<String>,
    /// When set, a JSON status report is written below this prefix at the end of each run.
    #[serde(default)]
    pub report_prefix: Option<String>,
    /// Only inputs ending in one of these extensions are considered. Empty means all.
    #[serde(default)]
    pub input_extensions: Vec<String>,
    /// Re-attempt inputs whose last attempt recorded errors, even if unchanged.
    #[serde(default = "default_retry_failed")]
    pub retry_failed: bool,
    /// How many inputs may be read and transformed at the same time.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_retry_failed() -> bool {
    true
}

fn default_max_concurrency() -> usize {
    1
}

impl JobConfig {
    /// A job with default options and the given locations.
    pub fn new(
        input_prefix: impl Into<String>,
        output_prefix: impl Into<String>,
        ledger_path: impl Into<String>,
        dependency_prefix: impl Into<String>,
    ) -> Self {
        Self {
            input_prefix: input_prefix.into(),
            output_prefix: output_prefix.into(),
            ledger_path: ledger_path.into(),
            dependency_prefix: dependency_prefix.into(),
            ignore_path: None,
            report_prefix: None,
            input_extensions: Vec::new(),
            retry_failed: default_retry_failed(),
            max_concurrency: default_max_concurrency(),
        }
    }

    /// Whether `path` passes the extension filter.
    pub fn accepts_extension(&self, path: &str) -> bool {
        if self.input_extensions.is_empty() {
            return true;
        }
        let lower = path.to_ascii_lowercase();
        self.input_extensions.iter().any(|ext| {
            let ext = ext.trim_start_matches('.').to_ascii_lowercase();
            lower.ends_with(&format!(".{ext}"))
        })
    }

    /// Check that no bookkeeping prefix equals or contains the input prefix, and that the
    /// ledger has a location.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger_path.trim_matches('/').is_empty() {
            return Err(ConfigError::EmptyLedgerPath);
        }
        let input = self.input_prefix.trim_matches('/');
        let bookkeeping = [
            ("output_prefix", Some(self.output_prefix.as_str())),
            ("dependency_prefix", Some(self.dependency_prefix.as_str())),
            ("report_prefix", self.report_prefix.as_deref()),
        ];
        for (key, prefix) in bookkeeping {
            let Some(prefix) = prefix.map(|p| p.trim_matches('/')) else {
                continue;
            };
            if prefix.is_empty() {
                continue;
            }
            if prefix == input || relative_to(input, prefix).is_some() {
                return Err(ConfigError::InputUnderBookkeeping {
                    key,
                    prefix: prefix.to_string(),
                    input_prefix: input.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn trace_loaded(&self) {
        info!(
            input_prefix = %self.input_prefix,
            output_prefix = %self.output_prefix,
            ledger_path = %self.ledger_path,
            max_concurrency = self.max_concurrency,
            "Loaded JobConfig"
        );
        debug!(?self, "JobConfig loaded (full debug)");
    }
}
