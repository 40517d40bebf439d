use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

use crate::transfer::WatchdogConfig;

/// Environment variable that disables the idle exit
pub const KEEP_RUNNING_ENV: &str = "TRANSFER_ENGINE_KEEP_RUNNING";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub callbacks: CallbackConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub sweep_interval_secs: u64,
    /// Silence after which a live transfer is interrupted
    pub expiry_threshold_secs: u64,
    pub notifications_enabled: bool,
    pub command_queue_size: usize,
    pub event_capacity: usize,
    /// Exit after this long without live transfers
    pub idle_exit_secs: u64,
    pub keep_running: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            expiry_threshold_secs: 180,
            notifications_enabled: true,
            command_queue_size: 256,
            event_capacity: 1024,
            idle_exit_secs: 60,
            keep_running: false,
        }
    }
}

impl EngineConfig {
    pub fn watchdog(&self) -> WatchdogConfig {
        WatchdogConfig {
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            expiry_threshold: Duration::from_secs(self.expiry_threshold_secs),
        }
    }

    pub fn idle_exit(&self) -> Duration {
        Duration::from_secs(self.idle_exit_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON snapshot file; records are kept in memory only when unset
    pub snapshot_path: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CallbackConfig {
    pub timeout_ms: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

impl CallbackConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        let mut config = Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: config_path,
            source,
        })?;
        if std::env::var_os(KEEP_RUNNING_ENV).is_some() {
            config.engine.keep_running = true;
        }
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}
