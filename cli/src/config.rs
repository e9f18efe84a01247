// Configuration management for the DataPipe CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/datapipe/config.json
// - Linux: ~/.config/datapipe/config.json
// - Windows: %APPDATA%\datapipe\config.json

use anyhow::{Context, Result};
use datapipe_core::{DeliveryMode, OverflowPolicy, PipeConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pipe settings shared with the peripheral side
    pub pipe: PipeConfig,

    /// Central (host) settings
    pub central: CentralConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralConfig {
    /// Name or address fragment of the peripheral to talk to
    pub target: Option<String>,

    /// Scan window in seconds
    pub scan_secs: u64,

    /// MTU the central sizes its writes for
    pub write_mtu: u16,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            target: None,
            scan_secs: 5,
            write_mtu: 185,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("datapipe");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;

        if config_file.exists() {
            let contents =
                std::fs::read_to_string(&config_file).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config.pipe.validate().context("Invalid pipe settings")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let config_file = Self::config_file()?;
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_file, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value and persist it
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.apply(key, value)?;
        self.pipe.validate().context("Rejected value")?;
        self.save()
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "device_name" => self.pipe.device_name = value.to_string(),
            "service_uuid" => {
                self.pipe.service_uuid = value.parse().context("Invalid UUID")?;
            }
            "characteristic_uuid" => {
                self.pipe.characteristic_uuid = value.parse().context("Invalid UUID")?;
            }
            "delivery_mode" => {
                self.pipe.delivery_mode = parse_mode(value)?;
            }
            "preferred_mtu" => {
                self.pipe.preferred_mtu = value.parse().context("Invalid MTU")?;
            }
            "overflow" => {
                self.pipe.overflow = match value {
                    "carry" => OverflowPolicy::Carry,
                    "discard" => OverflowPolicy::Discard,
                    _ => anyhow::bail!("Overflow policy must be 'carry' or 'discard'"),
                };
            }
            "throttle_short_ms" => {
                self.pipe.throttle.short_ms = value.parse().context("Invalid number")?;
            }
            "throttle_long_ms" => {
                self.pipe.throttle.long_ms = value.parse().context("Invalid number")?;
            }
            "target" => {
                self.central.target = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "scan_secs" => {
                self.central.scan_secs = value.parse().context("Invalid number")?;
            }
            "write_mtu" => {
                let mtu: u16 = value.parse().context("Invalid MTU")?;
                if mtu < 7 {
                    anyhow::bail!("write_mtu must be at least 7");
                }
                self.central.write_mtu = mtu;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("device_name".to_string(), self.pipe.device_name.clone()),
            ("service_uuid".to_string(), self.pipe.service_uuid.to_string()),
            ("characteristic_uuid".to_string(), self.pipe.characteristic_uuid.to_string()),
            ("delivery_mode".to_string(), self.pipe.delivery_mode.to_string()),
            ("preferred_mtu".to_string(), self.pipe.preferred_mtu.to_string()),
            ("overflow".to_string(), format!("{:?}", self.pipe.overflow).to_lowercase()),
            ("throttle_short_ms".to_string(), self.pipe.throttle.short_ms.to_string()),
            ("throttle_long_ms".to_string(), self.pipe.throttle.long_ms.to_string()),
            ("target".to_string(), self.central.target.clone().unwrap_or_else(|| "(any)".to_string())),
            ("scan_secs".to_string(), self.central.scan_secs.to_string()),
            ("write_mtu".to_string(), self.central.write_mtu.to_string()),
        ]
    }
}

/// Accepts `indicate`/`confirmed` and `notify`/`unconfirmed`
pub fn parse_mode(value: &str) -> Result<DeliveryMode> {
    match value {
        "indicate" | "confirmed" => Ok(DeliveryMode::Confirmed),
        "notify" | "unconfirmed" => Ok(DeliveryMode::Unconfirmed),
        _ => anyhow::bail!("Delivery mode must be 'indicate' or 'notify'"),
    }
}
