// Run configuration structs
//
// A RunConfig is loaded once at startup and never mutated afterwards.
// Presence of the optional [adapter] and [sampling] tables toggles the
// persistence strategy and the sampling cadence controller respectively;
// downstream code pattern-matches on the Options, never on attribute lookups.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::training::SchedulerKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of epochs to train for
    pub epochs: u32,

    /// Per-device batch size
    pub batch_size: usize,

    /// Random seed for shuffling and device RNGs
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Root directory for checkpoints, the final model, and metrics
    pub output_dir: PathBuf,

    /// Write per-step metrics to <output_dir>/metrics (rank 0 only)
    #[serde(default)]
    pub enable_metrics_logging: bool,

    #[serde(default)]
    pub optimizer: OptimizerConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    pub model: ModelConfig,

    pub dataset: DatasetConfig,

    /// Low-rank adapter configuration. Present: adapter-only persistence and
    /// adapter-wrapped model construction. Absent: full-model consolidation.
    #[serde(default)]
    pub adapter: Option<AdapterConfig>,

    /// Sampling configuration. Present: rank 0 runs generation checks every
    /// `sample_frequency` batches. Absent: no sampling at all.
    #[serde(default)]
    pub sampling: Option<SamplingConfig>,
}

fn default_seed() -> u64 {
    42
}

impl RunConfig {
    /// Validate invariants that TOML typing alone cannot express
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            bail!("epochs must be >= 1");
        }
        if self.batch_size == 0 {
            bail!("batch_size must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.scheduler.warmup_ratio) {
            bail!(
                "scheduler.warmup_ratio must be within [0, 1], got {}",
                self.scheduler.warmup_ratio
            );
        }
        if self.dataset.max_seq_len < 2 {
            bail!("dataset.max_seq_len must be >= 2 for next-token prediction");
        }
        self.optimizer.validate()?;
        if let Some(adapter) = &self.adapter {
            adapter.validate()?;
        }
        if let Some(sampling) = &self.sampling {
            sampling.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Peak learning rate fed into the schedule
    pub lr: f64,
    pub weight_decay: f64,
    pub beta1: f64,
    pub beta2: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            lr: 2e-5,
            weight_decay: 0.01,
            beta1: 0.9,
            beta2: 0.999,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.lr.is_finite() || self.lr <= 0.0 {
            bail!("optimizer.lr must be > 0");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Schedule shape; the learning rate is a function of the global step only
    #[serde(rename = "type")]
    pub kind: SchedulerKind,

    /// Fraction of one epoch's steps spent ramping up from zero
    pub warmup_ratio: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            kind: SchedulerKind::Cosine,
            warmup_ratio: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model provider backend ("local" is the in-crate Candle backend)
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Hidden dimension of the local backend
    #[serde(default = "default_hidden_dim")]
    pub hidden_dim: usize,
}

fn default_backend() -> String {
    "local".to_string()
}

fn default_hidden_dim() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Line-delimited JSON file with a "text" field per record
    pub path: PathBuf,

    /// tokenizer.json file loaded by the tokenizers crate
    pub tokenizer: PathBuf,

    #[serde(default = "default_max_seq_len")]
    pub max_seq_len: usize,

    #[serde(default = "default_shuffle")]
    pub shuffle: bool,
}

fn default_max_seq_len() -> usize {
    512
}

fn default_shuffle() -> bool {
    true
}

/// Low-rank adapter configuration
///
/// LoRA learns low-rank updates to the targeted weight matrices while the
/// base weights stay frozen, which is what makes adapter-only checkpoints
/// small enough to save from a single rank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Rank of the low-rank decomposition (typically 4-64)
    pub rank: usize,

    /// Scaling factor for adapter updates (common practice: 2 * rank)
    pub alpha: f64,

    #[serde(default)]
    pub dropout: f64,

    /// Modules the adapter attaches to (e.g. ["ff", "head"])
    #[serde(default = "default_target_modules")]
    pub target_modules: Vec<String>,
}

fn default_target_modules() -> Vec<String> {
    vec!["ff".to_string(), "head".to_string()]
}

impl AdapterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rank == 0 {
            bail!("adapter.rank must be >= 1");
        }
        if self.target_modules.is_empty() {
            bail!("adapter.target_modules must not be empty");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// A generation check fires every `sample_frequency` batches on rank 0
    pub sample_frequency: u64,

    /// Fixed prompt set generated against at every check
    pub prompts: Vec<String>,

    /// Append-only JSONL file the sample records go to
    pub output_path: PathBuf,
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_frequency == 0 {
            bail!("sampling.sample_frequency must be >= 1");
        }
        if self.prompts.is_empty() {
            bail!("sampling.prompts must not be empty");
        }
        Ok(())
    }
}
