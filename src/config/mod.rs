//! Configuration management for autobisect

pub mod schema;

pub use schema::{BisectConfig, Config, EvaluatorConfig, FetchConfig, GeneralConfig, StorageConfig};

use crate::error::{BisectError, BisectResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Reads and writes the TOML config file
pub struct ConfigManager {
    config_path: PathBuf,
}

/// Manager for `<config dir>/autobisect/config.toml`
impl Default for ConfigManager {
    fn default() -> Self {
        let config_path = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("autobisect")
            .join("config.toml");
        Self { config_path }
    }
}

impl ConfigManager {
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Load and validate the configuration; a missing file yields defaults
    pub async fn load(&self) -> BisectResult<Config> {
        let path = &self.config_path;
        if !path.exists() {
            debug!("Config file {} not found, using defaults", path.display());
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| BisectError::io(format!("reading config from {}", path.display()), e))?;

        let invalid = |reason: String| BisectError::ConfigInvalid {
            path: path.clone(),
            reason,
        };
        let config: Config = toml::from_str(&content).map_err(|e| invalid(e.to_string()))?;
        config.validate().map_err(|e| invalid(e.to_string()))?;
        Ok(config)
    }

    /// Write `config`, creating the parent directory if needed
    pub async fn save(&self, config: &Config) -> BisectResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BisectError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            BisectError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }
}
