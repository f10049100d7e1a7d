// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration management for the coordinator.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("No config directory found")]
    NoConfigDir,
}

fn default_messaging_timeout_ms() -> u64 {
    2000
}

fn default_meter_interval_ms() -> u64 {
    100
}

fn default_log_filter() -> String {
    "pagecomp=info,pagecomp_daemon=debug".to_string()
}

/// Coordinator settings, read from `daemon.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Where the settings document lives. Defaults to the data directory.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
    /// How long to wait for a page or panel before calling it unreachable.
    #[serde(default = "default_messaging_timeout_ms")]
    pub messaging_timeout_ms: u64,
    /// Level sampling period while a panel is listening.
    #[serde(default = "default_meter_interval_ms")]
    pub meter_interval_ms: u64,
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            storage_dir: None,
            messaging_timeout_ms: default_messaging_timeout_ms(),
            meter_interval_ms: default_meter_interval_ms(),
            log_filter: default_log_filter(),
        }
    }
}

impl DaemonConfig {
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn messaging_timeout(&self) -> Duration {
        Duration::from_millis(self.messaging_timeout_ms)
    }

    pub fn meter_interval(&self) -> Duration {
        Duration::from_millis(self.meter_interval_ms.max(1))
    }
}

/// Configuration manager handles locating, loading and saving config files.
pub struct ConfigManager {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl ConfigManager {
    /// Create a config manager rooted at the platform's standard directories.
    pub fn new() -> Result<Self, ConfigError> {
        let dirs = directories::ProjectDirs::from("com", "pagecomp", "pagecomp")
            .ok_or(ConfigError::NoConfigDir)?;

        Self::with_dirs(dirs.config_dir().to_path_buf(), dirs.data_dir().to_path_buf())
    }

    /// Create a config manager rooted at explicit directories.
    pub fn with_dirs(config_dir: PathBuf, data_dir: PathBuf) -> Result<Self, ConfigError> {
        fs::create_dir_all(&config_dir)?;
        fs::create_dir_all(&data_dir)?;

        debug!("Config directory: {:?}", config_dir);
        Ok(Self {
            config_dir,
            data_dir,
        })
    }

    fn config_path(&self) -> PathBuf {
        self.config_dir.join("daemon.toml")
    }

    /// Load the daemon configuration, or defaults if none is saved.
    pub fn load_config(&self) -> Result<DaemonConfig, ConfigError> {
        let path = self.config_path();
        if !path.exists() {
            debug!("No daemon config found, using defaults");
            return Ok(DaemonConfig::default());
        }

        let content = fs::read_to_string(&path)?;
        let config = DaemonConfig::from_toml(&content)?;
        info!("Loaded daemon config from {:?}", path);
        Ok(config)
    }

    /// Save the daemon configuration.
    pub fn save_config(&self, config: &DaemonConfig) -> Result<(), ConfigError> {
        let path = self.config_path();
        fs::write(&path, config.to_toml()?)?;
        debug!("Saved daemon config to {:?}", path);
        Ok(())
    }

    /// Directory holding the settings document for `config`.
    pub fn storage_dir(&self, config: &DaemonConfig) -> PathBuf {
        config
            .storage_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.clone())
    }
}
