//! Configuration management for ipxd

pub mod schema;

pub use schema::Config;

use crate::error::{IpxError, IpxResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
    explicit: bool,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
            explicit: false,
        }
    }

    /// Create a config manager with a custom path
    ///
    /// Unlike the default path, an explicit path must exist.
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            config_path: path,
            explicit: true,
        }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        PathBuf::from("./config.yml")
    }

    /// Load configuration, falling back to defaults if the default file is absent
    pub async fn load(&self) -> IpxResult<Config> {
        if !self.config_path.exists() {
            if self.explicit {
                return Err(IpxError::ConfigNotFound(self.config_path.clone()));
            }
            debug!(
                "Config file {} not found, using defaults",
                self.config_path.display()
            );
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    ///
    /// `.toml` files are parsed as TOML, everything else as YAML.
    pub async fn load_from_file(&self, path: &Path) -> IpxResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| IpxError::io(format!("reading config from {}", path.display()), e))?;

        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        let parsed = if is_toml {
            toml::from_str(&content).map_err(|e| e.to_string())
        } else if content.trim().is_empty() {
            Ok(Config::default())
        } else {
            serde_yaml::from_str(&content).map_err(|e| e.to_string())
        };

        let config = parsed.map_err(|reason| IpxError::ConfigInvalid {
            path: path.to_path_buf(),
            reason,
        })?;

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
