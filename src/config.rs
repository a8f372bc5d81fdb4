// ABOUTME: Configuration management for the Mongo Warden service
// ABOUTME: Handles bind address, probe timeouts, and data directory locations

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bounded timeout for every probe/connection attempt, in seconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Override for the data directory; platform default when absent
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_max_history")]
    pub max_history_entries: u32,
}

fn default_version() -> u32 {
    1
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_max_history() -> u32 {
    200
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: 1,
            host: default_host(),
            port: default_port(),
            probe_timeout_secs: default_probe_timeout(),
            data_dir: None,
            max_history_entries: default_max_history(),
        }
    }
}

impl AppConfig {
    /// Get the config file path based on OS
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoDirFound)?;
        let app_dir = config_dir.join("mongo-warden");
        Ok(app_dir.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;

        if !path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let contents = fs::read_to_string(&path)?;
        let config: AppConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(&path, contents)?;
        Ok(())
    }

    /// Resolve the data directory, creating it if needed
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        let dir = match &self.data_dir {
            Some(d) => d.clone(),
            None => dirs::data_local_dir()
                .ok_or(ConfigError::NoDirFound)?
                .join("mongo-warden"),
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Path of the SQLite registry database
    pub fn registry_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join("warden.db"))
    }

    /// Directory holding backup archives, created on first use
    pub fn backups_dir(&self) -> Result<PathBuf, ConfigError> {
        let dir = self.data_dir()?.join("backups");
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}
