// Metrics logger
// Append-only JSONL under <output_dir>/metrics, created on rank 0 only,
// after the startup barrier has ordered it ahead of every rank's loop.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::types::StepMetric;

pub const METRICS_DIR: &str = "metrics";
const STEPS_FILE: &str = "steps.jsonl";

/// Writes one JSON line per optimization step
pub struct MetricsLogger {
    path: PathBuf,
    file: File,
}

impl MetricsLogger {
    /// Create the metrics directory and open the step log for appending
    pub fn new(output_dir: &Path) -> Result<Self> {
        let dir = output_dir.join(METRICS_DIR);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create metrics directory {}", dir.display()))?;

        let path = dir.join(STEPS_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open metrics file {}", path.display()))?;

        tracing::info!(path = %path.display(), "Metrics logging enabled");

        Ok(Self { path, file })
    }

    pub fn log_step(&mut self, metric: &StepMetric) -> Result<()> {
        let line = serde_json::to_string(metric).context("Failed to serialize step metric")?;
        writeln!(self.file, "{}", line)
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        Ok(())
    }
}
