// Sampling module
// In-training generation checks against the live model

mod cadence;
mod engine;
mod records;

pub use cadence::SamplingCadence;
pub use engine::GenerationEngine;
pub use records::{write_samples, SampleRecord};
