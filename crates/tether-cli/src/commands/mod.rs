//! CLI command implementations

pub mod init;
pub mod offsets;
pub mod run;
pub mod validate;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tether_core::Config;

use crate::ConfigFormat;

/// Load configuration from the selected source
pub fn load_config(format: ConfigFormat, conf_file: Option<&Path>) -> Result<Config> {
    let default_file = |name: &str| PathBuf::from(".").join(name);
    match format {
        ConfigFormat::Env => {
            Config::from_env_vars().context("Failed to load configuration from environment")
        }
        ConfigFormat::Yaml => {
            let path = conf_file.map_or_else(|| default_file("config.yaml"), Path::to_path_buf);
            Config::from_yaml_file(&path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))
        }
        ConfigFormat::Json => {
            let path = conf_file.map_or_else(|| default_file("config.json"), Path::to_path_buf);
            Config::from_json_file(&path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))
        }
    }
}
