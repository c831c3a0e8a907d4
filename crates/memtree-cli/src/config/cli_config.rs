//! CLI configuration file support
//!
//! Loads configuration from ~/.config/memtree/config.toml

use std::path::PathBuf;

use anyhow::{Context, Result};
use memtree_core::MemoryConfig;
use serde::{Deserialize, Serialize};

/// CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// Default settings
    #[serde(default)]
    pub default: DefaultConfig,
    /// Memory settings shared with applications embedding the core
    #[serde(default)]
    pub memory: MemoryConfig,
}

/// Default configuration values
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultConfig {
    /// Default database path
    pub db_path: Option<String>,
}

impl CliConfig {
    /// Load configuration from default path
    pub fn load() -> Result<Self> {
        Self::load_from_path(Self::default_path())
    }

    /// Load configuration from a specific path. A missing file yields defaults.
    pub fn load_from_path(path: Option<PathBuf>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        config.memory.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("memtree").join("config.toml"))
    }

    /// Database path: command line first, then config file, then the data dir.
    pub fn resolve_db_path(&self, cli_path: Option<&str>) -> Result<PathBuf> {
        if let Some(path) = cli_path.or(self.default.db_path.as_deref()) {
            return Ok(PathBuf::from(path));
        }
        dirs::data_dir()
            .map(|dir| dir.join("memtree").join("memtree.redb"))
            .context("Cannot determine data directory, pass --db-path")
    }
}
