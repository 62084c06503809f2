// Configuration management for the gattserial CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/gattserial/config.json
// - Linux: ~/.config/gattserial/config.json
// - Windows: %APPDATA%\gattserial\config.json

use anyhow::{Context, Result};
use gattserial_core::SerialConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address reported by the simulated peripheral
    pub device_address: String,

    /// Advertised name of the simulated peripheral
    pub device_name: Option<String>,

    /// Largest MTU the simulated peripheral accepts
    pub peripheral_mtu: u16,

    /// tracing filter used when RUST_LOG is not set
    pub log_filter: String,

    /// Transport settings
    pub transport: SerialConfig,

    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_address: "C0:FF:EE:00:00:01".to_string(),
            device_name: Some("gattserial-sim".to_string()),
            peripheral_mtu: 247,
            log_filter: "warn".to_string(),
            transport: SerialConfig::default(),
            path: None,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("gattserial");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            serde_json::from_str::<Config>(&contents).context("Failed to parse config file")?
        } else {
            Config::default()
        };
        config.path = Some(path.to_path_buf());
        if !path.exists() {
            config.save()?;
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = match &self.path {
            Some(path) => path.clone(),
            None => Self::config_file()?,
        };
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value and persist it
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut next = self.clone();
        match key {
            "device_address" => next.device_address = value.to_string(),
            "device_name" => {
                next.device_name = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "peripheral_mtu" => {
                next.peripheral_mtu = value.parse().context("Invalid MTU")?;
            }
            "log_filter" => next.log_filter = value.to_string(),
            "max_mtu" => {
                next.transport.max_mtu = value.parse().context("Invalid MTU")?;
            }
            "default_mtu" => {
                next.transport.default_mtu = value.parse().context("Invalid MTU")?;
            }
            "request_mtu" => {
                next.transport.request_mtu = value.parse().context("Invalid boolean value")?;
            }
            "subscribe_system_events" => {
                next.transport.subscribe_system_events =
                    value.parse().context("Invalid boolean value")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        next.transport.validate()?;
        *self = next;
        self.save()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "device_address" => Some(self.device_address.clone()),
            "device_name" => self.device_name.clone(),
            "peripheral_mtu" => Some(self.peripheral_mtu.to_string()),
            "log_filter" => Some(self.log_filter.clone()),
            "max_mtu" => Some(self.transport.max_mtu.to_string()),
            "default_mtu" => Some(self.transport.default_mtu.to_string()),
            "request_mtu" => Some(self.transport.request_mtu.to_string()),
            "subscribe_system_events" => Some(self.transport.subscribe_system_events.to_string()),
            _ => None,
        }
    }

    pub fn list(&self) -> Vec<(String, String)> {
        [
            "device_address",
            "device_name",
            "peripheral_mtu",
            "log_filter",
            "max_mtu",
            "default_mtu",
            "request_mtu",
            "subscribe_system_events",
        ]
        .iter()
        .map(|key| {
            let value = self.get(key).unwrap_or_else(|| "(none)".to_string());
            (key.to_string(), value)
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.peripheral_mtu, 247);
        assert_eq!(config.transport.max_mtu, 512);
        assert!(config.transport.validate().is_ok());
    }

    #[test]
    fn test_load_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.log_filter, "warn");
    }

    #[test]
    fn test_set_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::load_from(&path).unwrap();
        config.set("max_mtu", "185").unwrap();
        config.set("device_name", "").unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.get("max_mtu").as_deref(), Some("185"));
        assert_eq!(reloaded.device_name, None);
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::load_from(&dir.path().join("config.json")).unwrap();

        assert!(config.set("max_mtu", "lots").is_err());
        assert!(config.set("max_mtu", "600").is_err());
        assert!(config.set("listen_port", "1").is_err());
        // a rejected value leaves the config untouched
        assert_eq!(config.transport.max_mtu, 512);
    }

    #[test]
    fn test_list_covers_all_keys() {
        let config = Config::default();
        let list = config.list();
        assert_eq!(list.len(), 8);
        for (key, _) in &list {
            if key != "device_name" {
                assert!(config.get(key).is_some(), "{key} readable");
            }
        }
    }
}
