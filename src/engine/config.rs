//! DocStore Configuration Module
//! Handles loading and validating docstore.config.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE: &str = "docstore.config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file
    pub path: PathBuf,
    #[serde(default = "default_journal_mode")]
    pub journal_mode: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_journal_mode() -> String {
    "WAL".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            journal_mode: default_journal_mode(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }

    /// Load the config from `dir`. A relative `path` is resolved against `dir`.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let config_path = dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path));
        }
        let content = std::fs::read_to_string(&config_path)?;
        let mut config: StoreConfig = serde_json::from_str(&content)?;
        if config.path.is_relative() {
            config.path = dir.join(&config.path);
        }
        Ok(config)
    }

    pub fn save(&self, dir: &Path) -> Result<(), ConfigError> {
        let config_path = dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }
}
