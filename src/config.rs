//! Converter Configuration
//!
//! Folders used to locate original images and model weights. Every key is
//! optional; a missing key only matters once a file actually needs it.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "invokeai_cfg.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub invokeai_output_folder: Option<PathBuf>,
    #[serde(default)]
    pub model_folder: Option<PathBuf>,
    #[serde(default)]
    pub vae_folder: Option<PathBuf>,
    #[serde(default)]
    pub lora_folder: Option<PathBuf>,
}

impl Config {
    /// Load the config file, or an empty config if it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "Config file found");
        Ok(config)
    }
}
