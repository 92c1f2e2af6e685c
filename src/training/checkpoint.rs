// Checkpoint discovery
// Finds the most recent epoch-tagged snapshot under the output root.
// Checkpoints are created at epoch boundaries, read at startup, and
// superseded (never deleted) by later ones.

use std::fs;
use std::path::{Path, PathBuf};

pub const CHECKPOINTS_DIR: &str = "checkpoints";
const EPOCH_PREFIX: &str = "epoch_";

/// `<output_dir>/checkpoints`
pub fn checkpoints_root(output_dir: &Path) -> PathBuf {
    output_dir.join(CHECKPOINTS_DIR)
}

/// `<output_dir>/checkpoints/epoch_<epoch>`
pub fn epoch_dir(output_dir: &Path, epoch: u32) -> PathBuf {
    checkpoints_root(output_dir).join(format!("{}{}", EPOCH_PREFIX, epoch))
}

/// Find the epoch index to resume from, if any checkpoint exists
///
/// Called exactly once, before the epoch loop begins, whether or not
/// resumption turns out to be needed: the outcome also decides whether a
/// configured adapter is restored from disk or initialized fresh.
///
/// Directory names that do not parse as `epoch_<i>` are skipped with a
/// warning; an absent or empty checkpoints directory means a fresh run.
pub fn find_latest(output_dir: &Path) -> Option<u32> {
    let root = checkpoints_root(output_dir);
    let entries = match fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(_) => return None,
    };

    let mut latest = None;
    for entry in entries.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        match parse_epoch_dir(&name) {
            Some(epoch) => {
                latest = Some(latest.map_or(epoch, |prev: u32| prev.max(epoch)));
            }
            None => {
                tracing::warn!(name = %name, "Skipping unrecognized checkpoint directory");
            }
        }
    }
    latest
}

/// Whether any resumable checkpoint exists under the output root
pub fn checkpoint_exists(output_dir: &Path) -> bool {
    find_latest(output_dir).is_some()
}

/// Directory of the most recent checkpoint, if any
pub fn latest_checkpoint_dir(output_dir: &Path) -> Option<PathBuf> {
    find_latest(output_dir).map(|epoch| epoch_dir(output_dir, epoch))
}

fn parse_epoch_dir(name: &str) -> Option<u32> {
    name.strip_prefix(EPOCH_PREFIX)?.parse().ok()
}
