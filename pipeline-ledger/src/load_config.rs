//! `load_config`: reads the YAML job description the CLI runs.
//!
//! This module is the only place where user-supplied YAML is parsed and mapped to the
//! strongly-typed [`JobConfig`], store and transform settings.
//!
//! # Responsibilities
//! - Parse the `job`, `store` and `transform` sections into typed structs
//! - Apply environment overrides (`PIPELINE_LEDGER_STORE_ROOT` replaces the local store root)
//! - Reject configurations that could never run, with messages that name the offending key
//!
//! # Errors
//! All errors use `anyhow::Error` and are surfaced at the CLI boundary.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use pipeline_ledger_core::config::JobConfig;
use serde::Deserialize;
use tracing::{error, info};

use crate::transform::TransformConfig;

/// Overrides `store.root` when set to a non-empty value.
pub const STORE_ROOT_ENV: &str = "PIPELINE_LEDGER_STORE_ROOT";

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    pub job: JobConfig,
    pub store: StoreSection,
    #[serde(default)]
    pub transform: TransformConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreSection {
    Local { root: PathBuf },
}

/// Load and validate the config file at `path`, applying environment overrides.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let mut config: CliConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if let Ok(root) = env::var(STORE_ROOT_ENV) {
        if !root.trim().is_empty() {
            info!(root = %root, "Store root overridden from {STORE_ROOT_ENV}");
            config.store = StoreSection::Local {
                root: PathBuf::from(root),
            };
        }
    }

    validate(&config)?;
    config.job.trace_loaded();
    Ok(config)
}

fn validate(config: &CliConfig) -> Result<()> {
    let job = &config.job;
    job.validate()?;
    if job.max_concurrency == 0 {
        bail!("job.max_concurrency must be at least 1");
    }
    if let TransformConfig::Command { program, .. } = &config.transform {
        if program.trim().is_empty() {
            bail!("transform.program must not be empty for kind: command");
        }
    }
    Ok(())
}
