// Generation engine contract
// The engine runs as logically separate inference infrastructure and does
// not automatically observe training updates; refresh_weights is how it
// catches up to the trainer's live parameters.

use anyhow::Result;

use crate::training::TrainerState;

/// Inference-side collaborator driven by the sampling cadence
///
/// Implementations must be callable from global rank 0 alone; a backend
/// that needs a collective weight gather before generating cannot sit
/// behind this trait.
pub trait GenerationEngine {
    /// Refresh the engine's view of the model's current weights
    ///
    /// A failure here is surfaced and aborts the run: samples produced from
    /// stale weights are silently misleading, which is worse than no
    /// samples at all.
    fn refresh_weights(&mut self, state: &TrainerState) -> Result<()>;

    /// Produce a completion for one prompt against the refreshed weights
    fn generate(&mut self, prompt: &str) -> Result<String>;
}
