// Pipe configuration: what to register with the stack and how to move bytes
//
// Stored as JSON; every field has a default so partial files load.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

use crate::transport::ble::framer::ThrottlePolicy;
use crate::transport::ble::gatt::{
    CharacteristicProperties, DeliveryMode, ServiceDefinition, DATAPIPE_CHARACTERISTIC_UUID,
    DATAPIPE_SERVICE_UUID, DEFAULT_MTU, MAX_CHARACTERISTIC_SIZE, PREFERRED_MTU,
};
use crate::transport::ble::reassembler::{OverflowPolicy, DEFAULT_RX_CAPACITY};

/// Largest ATT MTU the BLE spec allows
pub const MAX_ATT_MTU: u16 = 517;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// Advertised device name
    pub device_name: String,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    /// Initial delivery mode; switchable at runtime
    pub delivery_mode: DeliveryMode,
    /// MTU requested from the stack at init
    pub preferred_mtu: u16,
    pub characteristic_max_len: usize,
    pub throttle: ThrottlePolicy,
    pub overflow: OverflowPolicy,
    /// Receive buffer reservation in bytes
    pub rx_capacity: usize,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            device_name: "DataPipe".to_string(),
            service_uuid: DATAPIPE_SERVICE_UUID,
            characteristic_uuid: DATAPIPE_CHARACTERISTIC_UUID,
            delivery_mode: DeliveryMode::Confirmed,
            preferred_mtu: PREFERRED_MTU,
            characteristic_max_len: MAX_CHARACTERISTIC_SIZE,
            throttle: ThrottlePolicy::default(),
            overflow: OverflowPolicy::Carry,
            rx_capacity: DEFAULT_RX_CAPACITY,
        }
    }
}

impl PipeConfig {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            ..Self::default()
        }
    }

    pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = mode;
        self
    }

    pub fn with_uuids(mut self, service: Uuid, characteristic: Uuid) -> Self {
        self.service_uuid = service;
        self.characteristic_uuid = characteristic;
        self
    }

    pub fn with_throttle(mut self, throttle: ThrottlePolicy) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn with_preferred_mtu(mut self, mtu: u16) -> Self {
        self.preferred_mtu = mtu;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_name.trim().is_empty() {
            return Err(ConfigError::Invalid("device_name is empty".into()));
        }
        if self.service_uuid == self.characteristic_uuid {
            return Err(ConfigError::Invalid(
                "service and characteristic UUIDs must differ".into(),
            ));
        }
        if !(DEFAULT_MTU..=MAX_ATT_MTU).contains(&self.preferred_mtu) {
            return Err(ConfigError::Invalid(format!(
                "preferred_mtu {} outside {}..={}",
                self.preferred_mtu, DEFAULT_MTU, MAX_ATT_MTU
            )));
        }
        if self.characteristic_max_len < DEFAULT_MTU as usize {
            return Err(ConfigError::Invalid(format!(
                "characteristic_max_len {} is below {}",
                self.characteristic_max_len, DEFAULT_MTU
            )));
        }
        Ok(())
    }

    /// The service the stack registers for this pipe
    pub fn service_definition(&self) -> ServiceDefinition {
        ServiceDefinition {
            device_name: self.device_name.clone(),
            service_uuid: self.service_uuid,
            characteristic_uuid: self.characteristic_uuid,
            properties: CharacteristicProperties::data_pipe(),
            max_value_len: self.characteristic_max_len,
            preferred_mtu: self.preferred_mtu,
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: PipeConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipeConfig::default();
        config.validate().expect("Defaults validate");
        assert_eq!(config.preferred_mtu, 517);
        assert_eq!(config.characteristic_max_len, 514);
        assert_eq!(config.delivery_mode, DeliveryMode::Confirmed);
    }

    #[test]
    fn test_empty_name_rejected() {
        let config = PipeConfig::new("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mtu_bounds() {
        assert!(PipeConfig::default().with_preferred_mtu(22).validate().is_err());
        assert!(PipeConfig::default().with_preferred_mtu(518).validate().is_err());
        assert!(PipeConfig::default().with_preferred_mtu(23).validate().is_ok());
    }

    #[test]
    fn test_same_uuids_rejected() {
        let uuid = Uuid::new_v4();
        let config = PipeConfig::default().with_uuids(uuid, uuid);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_service_definition_registers_both_modes() {
        let def = PipeConfig::new("Sensor").service_definition();
        assert_eq!(def.device_name, "Sensor");
        assert!(def.properties.indicate && def.properties.notify);
        assert_eq!(def.max_value_len, 514);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().expect("Temp dir");
        let path = dir.path().join("nested").join("pipe.json");
        let config = PipeConfig::new("Bench")
            .with_delivery_mode(DeliveryMode::Unconfirmed)
            .with_overflow(OverflowPolicy::Discard);

        config.save_to(&path).expect("Save");
        let loaded = PipeConfig::load_from(&path).expect("Load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().expect("Temp dir");
        let path = dir.path().join("pipe.json");
        std::fs::write(&path, r#"{"device_name": "Partial", "delivery_mode": "unconfirmed"}"#)
            .expect("Write");

        let loaded = PipeConfig::load_from(&path).expect("Load");
        assert_eq!(loaded.device_name, "Partial");
        assert_eq!(loaded.delivery_mode, DeliveryMode::Unconfirmed);
        assert_eq!(loaded.throttle, ThrottlePolicy::default());
    }

    #[test]
    fn test_invalid_file_rejected() {
        let dir = tempdir().expect("Temp dir");
        let path = dir.path().join("pipe.json");
        std::fs::write(&path, r#"{"preferred_mtu": 5}"#).expect("Write");

        assert!(matches!(
            PipeConfig::load_from(&path),
            Err(ConfigError::Invalid(_))
        ));
    }
}
