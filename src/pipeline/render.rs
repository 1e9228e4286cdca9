//! Markdown → `.docx` rendering through an external tool (pandoc).
//!
//! The renderer is a black box: we hand it a Markdown file and a reference
//! document and read back whatever it writes. Each call gets its own
//! [`TempDir`], which is removed on every exit path, including early returns
//! and a cancelled future (the guard is dropped with it).

use crate::config::RendererConfig;
use crate::error::RenderError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

const INPUT_FILE: &str = "input.md";
const OUTPUT_FILE: &str = "output.docx";

/// Converts Markdown into a binary document styled by a template.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// `template` is the template's file name inside the templates directory.
    async fn render(&self, markdown: &str, template: &str) -> Result<Vec<u8>, RenderError>;
}

/// Runs `pandoc --from=markdown --to=docx --reference-doc=<template>`.
#[derive(Debug, Clone)]
pub struct PandocRenderer {
    config: RendererConfig,
}

impl PandocRenderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    pub fn template_path(&self, template: &str) -> PathBuf {
        self.config.templates_dir.join(template)
    }

    /// Argument list for one invocation. Kept separate so it can be asserted on.
    pub fn arguments(input: &Path, reference: &Path, output: &Path) -> Vec<String> {
        vec![
            input.display().to_string(),
            "--from=markdown".to_string(),
            "--to=docx".to_string(),
            format!("--reference-doc={}", reference.display()),
            format!("--output={}", output.display()),
        ]
    }

    fn scratch(&self) -> Result<TempDir, RenderError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("md2word-");
        let dir = match &self.config.scratch_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        };
        dir.map_err(|e| RenderError::Failed {
            detail: format!("cannot create scratch directory: {e}"),
        })
    }

    async fn run_tool(&self, workdir: &Path, reference: &Path) -> Result<Vec<u8>, RenderError> {
        let input = workdir.join(INPUT_FILE);
        let output = workdir.join(OUTPUT_FILE);
        let executable = &self.config.executable;

        let mut cmd = Command::new(executable);
        cmd.args(Self::arguments(&input, reference, &output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| RenderError::from_io(executable, &e))?;

        let out = tokio::time::timeout(self.config.timeout, child.wait_with_output())
            .await
            .map_err(|_| RenderError::Failed {
                detail: format!(
                    "{} did not finish within {}s",
                    executable.display(),
                    self.config.timeout.as_secs()
                ),
            })?
            .map_err(|e| RenderError::from_io(executable, &e))?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            return Err(RenderError::Failed {
                detail: format!("{} exited with {}: {stderr}", executable.display(), out.status),
            });
        }

        tokio::fs::read(&output).await.map_err(|e| RenderError::Failed {
            detail: format!("renderer produced no readable output: {e}"),
        })
    }
}

#[async_trait]
impl DocumentRenderer for PandocRenderer {
    async fn render(&self, markdown: &str, template: &str) -> Result<Vec<u8>, RenderError> {
        let reference = self.template_path(template);

        // Both must exist before we bother creating a scratch area.
        tokio::fs::metadata(&reference)
            .await
            .map_err(|e| RenderError::from_io(&reference, &e))?;
        tokio::fs::metadata(&self.config.executable)
            .await
            .map_err(|e| RenderError::from_io(&self.config.executable, &e))?;

        let scratch = self.scratch()?;
        debug!("Rendering in {}", scratch.path().display());

        let result = async {
            tokio::fs::write(scratch.path().join(INPUT_FILE), markdown)
                .await
                .map_err(|e| RenderError::Failed {
                    detail: format!("cannot write renderer input: {e}"),
                })?;
            self.run_tool(scratch.path(), &reference).await
        }
        .await;

        let scratch_path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            warn!(
                "Failed to remove scratch directory {}: {}",
                scratch_path.display(),
                e
            );
        }

        if let Ok(bytes) = &result {
            info!(
                "Rendered {} bytes of Markdown into {} bytes with template {}",
                markdown.len(),
                bytes.len(),
                template
            );
        }
        result
    }
}
