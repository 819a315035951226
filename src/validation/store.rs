//! Per-run artifact folder on disk.
//!
//! ```text
//! <data_dir>/runs/<run_id>/
//!   _input.json
//!   01_discover_competitors.md
//!   ...
//!   11_final_report.md
//!   _index.json
//!   _usage_metrics.json
//!   report.md
//! ```
//!
//! The database stays the source of truth. These files are for humans and
//! offline inspection.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use super::models::{PassMode, RunInput, Stage, StageArtifact, UsageMetrics, Verdict};

#[derive(Debug, Serialize)]
struct IndexEntry<'a> {
    stage: Stage,
    ordinal: u8,
    pass: PassMode,
    file: String,
    verdict: Option<Verdict>,
    chars: usize,
    created_at: &'a str,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// `root` is the `runs` directory itself.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &str) -> Result<PathBuf> {
        anyhow::ensure!(
            !run_id.is_empty()
                && run_id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
            "Refusing unsafe run id for artifact path: {:?}",
            run_id
        );
        Ok(self.root.join(run_id))
    }

    async fn write(&self, run_id: &str, file: &str, content: &[u8]) -> Result<PathBuf> {
        let dir = self.run_dir(run_id)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create run directory {}", dir.display()))?;
        let path = dir.join(file);
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    pub async fn write_input(&self, run_id: &str, input: &RunInput) -> Result<PathBuf> {
        let json = serde_json::to_vec_pretty(input).context("Failed to serialize run input")?;
        self.write(run_id, "_input.json", &json).await
    }

    pub async fn write_stage(&self, run_id: &str, stage: Stage, content: &str) -> Result<PathBuf> {
        let file = format!("{}.md", stage.file_stem());
        self.write(run_id, &file, content.as_bytes()).await
    }

    pub async fn write_index(&self, run_id: &str, artifacts: &[StageArtifact]) -> Result<PathBuf> {
        let entries: Vec<IndexEntry<'_>> = artifacts
            .iter()
            .map(|a| IndexEntry {
                stage: a.stage,
                ordinal: a.ordinal,
                pass: a.pass,
                file: format!("{}.md", a.stage.file_stem()),
                verdict: a.verdict,
                chars: a.content.chars().count(),
                created_at: &a.created_at,
            })
            .collect();
        let json = serde_json::to_vec_pretty(&entries).context("Failed to serialize artifact index")?;
        self.write(run_id, "_index.json", &json).await
    }

    pub async fn write_usage(&self, run_id: &str, usage: &UsageMetrics) -> Result<PathBuf> {
        let json = serde_json::to_vec_pretty(usage).context("Failed to serialize usage metrics")?;
        self.write(run_id, "_usage_metrics.json", &json).await
    }

    pub async fn write_report(&self, run_id: &str, markdown: &str) -> Result<PathBuf> {
        self.write(run_id, "report.md", markdown.as_bytes()).await
    }
}
