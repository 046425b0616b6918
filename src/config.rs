//! Configuration for peerquest-core

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("peerquest")
}

fn default_database_path() -> PathBuf {
    default_data_dir().join("peerquest.db")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Maximum application attempts per (quest, user) pair
    #[serde(default = "default_max_attempts")]
    pub max_application_attempts: i64,

    /// Refund the commission fee (not only the reward) when a quest is deleted
    #[serde(default)]
    pub refund_commission_on_delete: bool,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// How long a connection waits on a locked database before failing
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_max_attempts() -> i64 {
    4
}

fn default_pool_size() -> u32 {
    8
}

fn default_busy_timeout() -> u64 {
    5000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            max_application_attempts: default_max_attempts(),
            refund_commission_on_delete: false,
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl Config {
    /// Default config pointed at a specific database file
    pub fn with_database(path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: path.into(),
            ..Default::default()
        }
    }

    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Reject values the services cannot work with
    pub fn validate(&self) -> Result<(), crate::CoreError> {
        if self.max_application_attempts < 1 {
            return Err(crate::CoreError::Config(
                "max_application_attempts must be at least 1".into(),
            ));
        }
        if self.pool_size == 0 {
            return Err(crate::CoreError::Config("pool_size must be at least 1".into()));
        }
        Ok(())
    }
}
