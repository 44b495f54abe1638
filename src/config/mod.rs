use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

const APP_DIR: &str = "music-sync-engine";

/// Engine configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Catalog base URL, `None` runs without a remote catalog
    pub server_url: Option<String>,
    pub cache_capacity: usize,
    pub history_limit: usize,
    pub storage_directory: PathBuf,
    pub download_directory: PathBuf,
    pub force_offline: bool,
    pub reachability_host: String,
    pub reachability_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            server_url: None,
            cache_capacity: 200,
            history_limit: 50,
            storage_directory: data_dir.join("state"),
            download_directory: data_dir.join("downloads"),
            force_offline: false,
            reachability_host: "1.1.1.1:443".to_string(),
            reachability_interval_secs: 15,
            request_timeout_secs: 20,
            event_capacity: 64,
        }
    }
}

impl EngineConfig {
    /// Parsed catalog URL, if one is configured
    pub fn server_url(&self) -> Result<Option<Url>, ConfigError> {
        self.server_url
            .as_deref()
            .map(parse_server_url)
            .transpose()
    }

    pub fn reachability_interval(&self) -> Duration {
        Duration::from_secs(self.reachability_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

fn parse_server_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidServerUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidServerUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config: EngineConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        Self::with_path(config_path)
    }

    /// Manager backed by an explicit file, created on first save
    pub fn with_path(config_path: PathBuf) -> Result<Self, ConfigError> {
        let config = Self::load_config(&config_path)?;
        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn get_config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn update_config<F>(&mut self, updater: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut EngineConfig),
    {
        updater(&mut self.config);
        self.save_config()
    }

    pub fn set_server_url(&mut self, url: Option<String>) -> Result<(), ConfigError> {
        if let Some(raw) = url.as_deref() {
            parse_server_url(raw)?;
        }
        self.config.server_url = url;
        self.save_config()
    }

    pub fn set_cache_capacity(&mut self, capacity: usize) -> Result<(), ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache_capacity".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        self.config.cache_capacity = capacity;
        self.save_config()
    }

    pub fn set_history_limit(&mut self, limit: usize) -> Result<(), ConfigError> {
        self.config.history_limit = limit;
        self.save_config()
    }

    pub fn set_force_offline(&mut self, offline: bool) -> Result<(), ConfigError> {
        self.config.force_offline = offline;
        self.save_config()
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.config = EngineConfig::default();
        self.save_config()
    }

    fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::home_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join(".config")
            .join(APP_DIR);

        std::fs::create_dir_all(&config_dir)?;

        Ok(config_dir.join("config.toml"))
    }

    fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
        if !path.exists() {
            return Ok(EngineConfig::default());
        }

        let config_content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&config_content)?;

        Ok(config)
    }

    fn save_config(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let config_content = toml::to_string_pretty(&self.config)?;
        std::fs::write(&self.config_path, config_content)?;

        Ok(())
    }
}
