// Metrics module
// Public interface for step-level metric logging

mod logger;
mod types;

pub use logger::MetricsLogger;
pub use types::StepMetric;
