// Configuration module
// Public interface for run configuration loading

mod loader;
mod settings;

pub use loader::load_config;
pub use settings::{
    AdapterConfig, DatasetConfig, ModelConfig, OptimizerConfig, RunConfig, SamplingConfig,
    SchedulerConfig,
};
