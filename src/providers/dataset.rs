// Dataset provider contract and the JSONL reference implementation
//
// The orchestrator needs a dataset that can be reset and re-iterated once
// per epoch; mid-stream restartability is never assumed.

use anyhow::{anyhow, Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use std::fs;
use tokenizers::Tokenizer;

use crate::config::DatasetConfig;
use crate::dist::ProcessIdentity;

/// One optimization step's worth of token id rows, all the same length
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub input_ids: Vec<Vec<u32>>,
}

/// Resettable, re-iterable batch stream with a known length
pub trait DatasetProvider {
    /// Number of batches one epoch holds across the whole dataset
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Prepare the next epoch (reshuffle); prior iterators must be dropped
    fn reset(&mut self);

    /// Fresh iterator over this rank's shard of the epoch
    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_>;
}

#[derive(Deserialize)]
struct TextRecord {
    text: String,
}

/// Dataset backed by a line-delimited JSON file with a "text" field
///
/// Token streams are packed into fixed-size blocks; the tail shorter than a
/// block is dropped, as are trailing blocks that do not fill a batch. Ranks
/// take batches round-robin and wrap around so every rank runs the same
/// step count per epoch.
pub struct JsonlDataset {
    blocks: Vec<Vec<u32>>,
    batch_size: usize,
    rank: usize,
    world_size: usize,
    shuffle: bool,
    rng: StdRng,
}

impl JsonlDataset {
    pub fn load(
        config: &DatasetConfig,
        tokenizer: &Tokenizer,
        batch_size: usize,
        identity: &ProcessIdentity,
        seed: u64,
    ) -> Result<Self> {
        let contents = fs::read_to_string(&config.path)
            .with_context(|| format!("Failed to read dataset {}", config.path.display()))?;

        let mut stream: Vec<u32> = Vec::new();
        for (number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: TextRecord = serde_json::from_str(line).with_context(|| {
                format!(
                    "Malformed dataset record at {}:{}",
                    config.path.display(),
                    number + 1
                )
            })?;
            let encoding = tokenizer
                .encode(record.text.as_str(), true)
                .map_err(|e| anyhow!("Tokenization failed at line {}: {}", number + 1, e))?;
            stream.extend_from_slice(encoding.get_ids());
        }

        let blocks: Vec<Vec<u32>> = stream
            .chunks_exact(config.max_seq_len)
            .map(|chunk| chunk.to_vec())
            .collect();

        if blocks.len() < batch_size {
            anyhow::bail!(
                "Dataset {} yields {} block(s) of {} tokens, not enough for one \
                 batch of {}",
                config.path.display(),
                blocks.len(),
                config.max_seq_len,
                batch_size
            );
        }

        tracing::info!(
            blocks = blocks.len(),
            batches = blocks.len() / batch_size,
            "Loaded dataset"
        );

        Ok(Self::from_blocks(
            blocks,
            batch_size,
            identity,
            seed,
            config.shuffle,
        ))
    }

    /// Build a dataset from pre-tokenized blocks (also used by tests)
    pub fn from_blocks(
        blocks: Vec<Vec<u32>>,
        batch_size: usize,
        identity: &ProcessIdentity,
        seed: u64,
        shuffle: bool,
    ) -> Self {
        let mut dataset = Self {
            blocks,
            batch_size,
            rank: identity.rank,
            world_size: identity.world_size,
            shuffle,
            rng: StdRng::seed_from_u64(seed),
        };
        if dataset.shuffle {
            dataset.blocks.shuffle(&mut dataset.rng);
        }
        dataset
    }

    fn batch_at(&self, index: usize) -> Batch {
        let start = index * self.batch_size;
        Batch {
            input_ids: self.blocks[start..start + self.batch_size].to_vec(),
        }
    }
}

impl DatasetProvider for JsonlDataset {
    fn len(&self) -> usize {
        self.blocks.len() / self.batch_size
    }

    fn reset(&mut self) {
        if self.shuffle {
            self.blocks.shuffle(&mut self.rng);
        }
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_> {
        let len = self.len();
        let steps = (len as u64).div_ceil(self.world_size as u64) as usize;
        let rank = self.rank;
        let world_size = self.world_size;
        Box::new(
            (0..steps).map(move |k| self.batch_at((rank + k * world_size) % len)),
        )
    }
}
