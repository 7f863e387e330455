pub mod batch;
pub mod query;

use anyhow::{Context, Result};

use crate::config::ClientConfig;

/// Load configuration, apply the command-line service root and validate
pub fn load_config(service_root: Option<&str>) -> Result<ClientConfig> {
    let mut config = ClientConfig::load().context("Failed to load configuration")?;
    if let Some(root) = service_root {
        config.service_root = root.to_string();
    }
    config.validate()?;
    Ok(config)
}
