//! `transform`: the transformers a job can be configured with.
//!
//! - [`CopyTransformer`] republishes each input unchanged at the same relative path
//! - [`CommandTransformer`] hands each input to an external program and collects whatever
//!   the program leaves in its output directory
//!
//! [`TransformConfig`] is the YAML-facing selector; [`TransformConfig::build`] turns it
//! into a boxed [`Transformer`] for [`pipeline_ledger_core::synchronise::synchronise`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::future::try_join_all;
use pipeline_ledger_core::contract::{
    TransformError, TransformInput, TransformedOutput, Transformer,
};
use pipeline_ledger_core::path::file_name;
use serde::Deserialize;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Which transformer a job runs, as written in the `transform:` section of the config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformConfig {
    #[default]
    Copy,
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl TransformConfig {
    pub fn build(&self) -> Box<dyn Transformer> {
        match self {
            TransformConfig::Copy => Box::new(CopyTransformer),
            TransformConfig::Command { program, args } => {
                Box::new(CommandTransformer::new(program.clone(), args.clone()))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CopyTransformer;

#[async_trait]
impl Transformer for CopyTransformer {
    async fn transform(&self, input: TransformInput) -> Result<Vec<TransformedOutput>, TransformError> {
        Ok(vec![TransformedOutput {
            relative_path: input.relative_path,
            content: input.content,
        }])
    }
}

/// Runs `program` once per input inside a scratch directory.
///
/// `{input}` in an argument is replaced by the path of the downloaded input file and
/// `{output_dir}` by an empty directory the program should write its results to. Every
/// regular file found there afterwards becomes an output under
/// `<relative input path without extension>/`.
#[derive(Debug, Clone)]
pub struct CommandTransformer {
    program: String,
    args: Vec<String>,
}

impl CommandTransformer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn render_args(&self, input: &Path, output_dir: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output_dir = output_dir.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input)
                    .replace("{output_dir}", &output_dir)
            })
            .collect()
    }
}

/// `raw/site1/scan.zip` becomes `raw/site1/scan`.
pub fn output_stem(relative_path: &str) -> &str {
    let name = file_name(relative_path);
    match name.rfind('.') {
        Some(dot) if dot > 0 => &relative_path[..relative_path.len() - (name.len() - dot)],
        _ => relative_path,
    }
}

/// Regular files below `dir`, as `/`-joined paths relative to it, sorted.
async fn collect_files(dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut reader = fs::read_dir(&current).await?;
        while let Some(entry) = reader.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let Ok(relative) = path.strip_prefix(dir) else {
                    continue;
                };
                let relative: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                files.push((relative.join("/"), path));
            }
        }
    }
    files.sort();
    Ok(files)
}

#[async_trait]
impl Transformer for CommandTransformer {
    async fn transform(&self, input: TransformInput) -> Result<Vec<TransformedOutput>, TransformError> {
        let workdir = tempfile::tempdir()?;
        let input_file = workdir.path().join("input").join(file_name(&input.relative_path));
        let output_dir = workdir.path().join("output");
        fs::create_dir_all(workdir.path().join("input")).await?;
        fs::create_dir_all(&output_dir).await?;
        fs::write(&input_file, &input.content).await?;

        let args = self.render_args(&input_file, &output_dir);
        debug!(program = %self.program, ?args, input = %input.path, "[TRANSFORM] Running command");
        let output = Command::new(&self.program)
            .args(&args)
            .current_dir(workdir.path())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(program = %self.program, status = %output.status, input = %input.path, "[TRANSFORM] Command failed");
            return Err(TransformError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let stem = output_stem(&input.relative_path);
        let files = collect_files(&output_dir).await?;
        let outputs = try_join_all(files.into_iter().map(|(relative, path)| async move {
            let content = fs::read(&path).await?;
            Ok::<_, std::io::Error>(TransformedOutput {
                relative_path: format!("{stem}/{relative}"),
                content,
            })
        }))
        .await?;

        info!(input = %input.path, outputs = outputs.len(), "[TRANSFORM] Command produced outputs");
        Ok(outputs)
    }
}
