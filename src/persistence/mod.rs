// Persistence strategy
// Decides, at each epoch boundary, where model state goes and by which
// mechanism. The mechanics live behind ModelPersistence: consolidation is a
// collective weight gather every rank participates in, adapter saves are
// small enough for rank 0 alone.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::training::checkpoint;

pub const FINAL_MODEL_DIR: &str = "final-model";
pub const END_EPOCH_MODEL_DIR: &str = "end-epoch-model";

/// How model state reaches durable storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMechanism {
    /// Gather sharded weights into one complete artifact. Collective: must
    /// be invoked by every rank even though only rank 0 writes.
    Consolidated,
    /// Write the low-rank adapter weights only. Rank-0-only.
    AdapterOnly,
}

/// One epoch boundary's persistence decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveTarget {
    pub dir: PathBuf,
    pub mechanism: SaveMechanism,
}

/// `<output_dir>/final-model`
pub fn final_model_dir(output_dir: &Path) -> PathBuf {
    output_dir.join(FINAL_MODEL_DIR)
}

/// `<output_dir>/checkpoints/epoch_<epoch>/end-epoch-model`
pub fn end_epoch_model_dir(output_dir: &Path, epoch: u32) -> PathBuf {
    checkpoint::epoch_dir(output_dir, epoch).join(END_EPOCH_MODEL_DIR)
}

/// Evaluate the decision table for the epoch that just finished
///
/// The last configured epoch writes to the final-model directory; every
/// earlier epoch writes a per-epoch checkpoint. Presence of an adapter
/// configuration selects the mechanism, never the directory.
pub fn plan_save(output_dir: &Path, epoch: u32, epochs: u32, adapter_present: bool) -> SaveTarget {
    let is_last = epoch + 1 == epochs;
    let dir = if is_last {
        final_model_dir(output_dir)
    } else {
        end_epoch_model_dir(output_dir, epoch)
    };
    let mechanism = if adapter_present {
        SaveMechanism::AdapterOnly
    } else {
        SaveMechanism::Consolidated
    };
    SaveTarget { dir, mechanism }
}

/// Model-side persistence contract
pub trait ModelPersistence {
    /// Gather and write the full model. Every rank must call this; the
    /// gather hangs if any shard holder is absent.
    fn save_consolidated(&self, dir: &Path) -> Result<()>;

    /// Write the adapter weights alone. Called on rank 0 only.
    fn save_adapter(&self, dir: &Path) -> Result<()>;

    /// Load adapter weights from a checkpoint discovered at startup
    fn restore_adapter(&mut self, dir: &Path) -> Result<()>;
}
