// Model provider contract

use anyhow::Result;

use crate::persistence::ModelPersistence;

use super::dataset::Batch;

/// Metrics returned by one optimization step
#[derive(Debug, Clone, Copy)]
pub struct StepOutcome {
    pub loss: f64,
}

/// The trainable model behind the orchestrator's loop
///
/// `step` is one atomic unit of work: forward, backward, optimizer update.
/// Any gradient synchronization happens inside it, which is why the
/// orchestrator calls it on every rank every iteration, unconditionally;
/// skipping a rank would mismatch the collective and hang the group.
pub trait ModelProvider: ModelPersistence {
    fn step(&mut self, batch: &Batch, lr: f64) -> Result<StepOutcome>;
}
