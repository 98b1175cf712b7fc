// src/commands/mod.rs
//! Command handlers for the fry CLI

mod cook;
mod detect;

pub use cook::{CookArgs, cmd_cook};
pub use detect::cmd_detect;

use anyhow::{Context, Result};
use fry::{DockerEngine, FryConfig};
use std::path::Path;
use tracing::debug;

/// Load the layered configuration: file, then environment
pub(crate) fn load_config(path: Option<&Path>) -> Result<FryConfig> {
    let mut config = FryConfig::load_or_default(path).context("Failed to load configuration")?;
    config
        .apply_env()
        .context("Invalid configuration from environment")?;
    Ok(config)
}

/// Connect to the engine named by `config`
pub(crate) fn open_engine(config: &FryConfig) -> Result<DockerEngine> {
    let endpoint = config.endpoint().context("Invalid engine endpoint")?;
    debug!("Using engine at {}", endpoint);
    Ok(DockerEngine::new(endpoint).with_timeout(config.timeout()))
}
