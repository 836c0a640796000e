//! Application configuration.

use crate::error::{AppError, AppResult};
use sensor_api::ApiConfig;
use sensor_ws::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "SENSOR_MONITOR_CONFIG";

/// Config file used when neither the CLI nor the environment names one.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Sensors subscribed on every connection.
    #[serde(default)]
    pub sensors: Vec<u32>,
    /// Seconds between statistics summaries.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

fn default_stats_interval_secs() -> u64 {
    60
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sensors: Vec::new(),
            stats_interval_secs: default_stats_interval_secs(),
            connection: ConnectionConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        self.connection
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;

        if self.stats_interval_secs == 0 {
            return Err(AppError::Config(
                "stats_interval_secs must be positive".to_string(),
            ));
        }
        if self.api.base_url.trim().is_empty() {
            return Err(AppError::Config("api.base_url must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// Sensor ids as metric labels.
    pub fn sensor_labels(&self) -> Vec<String> {
        self.sensors.iter().map(u32::to_string).collect()
    }
}
