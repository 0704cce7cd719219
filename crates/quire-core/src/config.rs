//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/quire/config.toml)
//! 3. Environment variables (QUIRE_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Environment variable prefix
const ENV_PREFIX: &str = "QUIRE";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding database snapshots and blobs
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Namespace for the version marker and snapshot entries
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Largest text content (in bytes) kept inline in the database
    #[serde(default = "default_inline_threshold")]
    pub inline_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            key_prefix: default_key_prefix(),
            inline_threshold: default_inline_threshold(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (QUIRE_DATA_DIR, QUIRE_KEY_PREFIX, QUIRE_INLINE_THRESHOLD)
    /// 2. Config file (~/.config/quire/config.toml or QUIRE_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // QUIRE_DATA_DIR
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // QUIRE_KEY_PREFIX
        if let Ok(val) = std::env::var(format!("{}_KEY_PREFIX", ENV_PREFIX)) {
            if !val.is_empty() {
                self.key_prefix = val;
            }
        }

        // QUIRE_INLINE_THRESHOLD
        if let Ok(val) = std::env::var(format!("{}_INLINE_THRESHOLD", ENV_PREFIX)) {
            match val.parse() {
                Ok(threshold) => self.inline_threshold = threshold,
                Err(_) => warn!(value = %val, "Ignoring invalid QUIRE_INLINE_THRESHOLD"),
            }
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with QUIRE_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quire")
            .join("config.toml")
    }

    /// Directory blobs are written under
    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join(crate::blob::BLOB_DIR)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quire")
}

fn default_key_prefix() -> String {
    "quire".to_string()
}

fn default_inline_threshold() -> usize {
    64 * 1024
}
