// Provider module
// Collaborator contracts the orchestrator drives, plus the bundled
// single-process Candle backend and the factory that wires a run together.

mod dataset;
mod local;
mod model;

pub use dataset::{Batch, DatasetProvider, JsonlDataset};
pub use local::{LocalGenerationEngine, LocalModel};
pub use model::{ModelProvider, StepOutcome};

use anyhow::{anyhow, bail, Result};
use candle_core::Device;
use tokenizers::Tokenizer;

use crate::config::RunConfig;
use crate::dist::ProcessIdentity;
use crate::sampling::GenerationEngine;

/// Everything a run needs beyond the orchestrator itself
pub struct ProviderSet {
    pub model: Box<dyn ModelProvider>,
    pub dataset: Box<dyn DatasetProvider>,
    /// Present only when sampling is configured and this is rank 0
    pub engine: Option<Box<dyn GenerationEngine>>,
}

/// Build the providers named by the run configuration
pub fn build(config: &RunConfig, identity: &ProcessIdentity, device: &Device) -> Result<ProviderSet> {
    match config.model.backend.as_str() {
        "local" => build_local(config, identity, device),
        other => bail!("Unknown model backend '{}' (available: local)", other),
    }
}

fn build_local(
    config: &RunConfig,
    identity: &ProcessIdentity,
    device: &Device,
) -> Result<ProviderSet> {
    if identity.world_size > 1 {
        bail!(
            "The 'local' backend trains in a single process and cannot join a \
             world of {}; plug in a sharded model backend for multi-process runs",
            identity.world_size
        );
    }

    let tokenizer = Tokenizer::from_file(&config.dataset.tokenizer).map_err(|e| {
        anyhow!(
            "Failed to load tokenizer {}: {}",
            config.dataset.tokenizer.display(),
            e
        )
    })?;
    let vocab_size = tokenizer.get_vocab_size(true);

    let model = LocalModel::new(
        &config.model,
        &config.optimizer,
        config.adapter.as_ref(),
        vocab_size,
        device.clone(),
    )?;

    let engine: Option<Box<dyn GenerationEngine>> =
        if config.sampling.is_some() && identity.is_main() {
            Some(Box::new(model.generation_engine(
                tokenizer.clone(),
                config.dataset.max_seq_len,
            )))
        } else {
            None
        };

    let dataset = JsonlDataset::load(
        &config.dataset,
        &tokenizer,
        config.batch_size,
        identity,
        config.seed,
    )?;

    Ok(ProviderSet {
        model: Box::new(model),
        dataset: Box::new(dataset),
        engine,
    })
}
