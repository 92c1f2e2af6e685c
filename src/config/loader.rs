// Configuration loader
// Reads a run configuration from a TOML file given on the command line

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::errors::config_parse_error;

use super::settings::RunConfig;

/// Load and validate a run configuration from a TOML file
pub fn load_config(path: &Path) -> Result<RunConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config: RunConfig = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!(config_parse_error(&path.display().to_string(), &e.to_string())))?;

    config.validate()?;

    tracing::debug!(
        epochs = config.epochs,
        batch_size = config.batch_size,
        adapter = config.adapter.is_some(),
        sampling = config.sampling.is_some(),
        "Loaded run configuration"
    );

    Ok(config)
}
