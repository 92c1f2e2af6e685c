// Sampling cadence
// Decides, per batch, whether a generation check should run

/// Cadence policy for in-training generation checks
///
/// Sampling is single-writer by design: only global rank 0 ever fires, which
/// avoids redundant generation work and contention on the output file. The
/// frequency is validated to be >= 1 at config load.
#[derive(Debug, Clone, Copy)]
pub struct SamplingCadence {
    frequency: u64,
}

impl SamplingCadence {
    pub fn new(frequency: u64) -> Self {
        Self { frequency }
    }

    /// True iff this rank should sample after the given batch
    pub fn should_fire(&self, rank: usize, batch_index: u64) -> bool {
        rank == 0 && batch_index % self.frequency == 0
    }
}
