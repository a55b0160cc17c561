use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::TrayError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How often the daemon asks the VPN client for its status.
    pub poll_interval_ms: u64,
    pub notifications: bool,
    pub notification_timeout_ms: u32,
    /// Name or path of the Twingate command-line client.
    pub cli: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            poll_interval_ms: 500,
            notifications: true,
            notification_timeout_ms: 5000,
            cli: "twingate".into(),
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reads the user's config file, falling back to defaults when there is none.
    pub fn load() -> Result<Self, TrayError> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, TrayError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let data = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&data)
            .map_err(|e| TrayError::Config(format!("{}: {e}", path.display())))?;
        if config.poll_interval_ms == 0 {
            return Err(TrayError::Config(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(config)
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("twingate_tray")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}
