/// GATT service definition and the peripheral stack seam
///
/// The pipe lives on a single characteristic. The platform BLE stack
/// (NimBLE, BlueZ, CoreBluetooth...) is reached through [`GattPeripheral`],
/// and drives the pipe back through [`PeripheralEvents`]. The protocol logic
/// is testable without BLE hardware.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Default DataPipe service UUID
pub const DATAPIPE_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);

/// Default DataPipe characteristic UUID (read / write / indicate / notify)
pub const DATAPIPE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e24dcca9e);

/// ATT MTU every BLE link starts with, and the fallback when no peer is attached
pub const DEFAULT_MTU: u16 = 23;

/// MTU requested at stack init so attribute values up to 512 bytes fit
pub const PREFERRED_MTU: u16 = 517;

/// Maximum characteristic value length registered with the stack
pub const MAX_CHARACTERISTIC_SIZE: usize = 514;

/// Bytes of each ATT PDU not available to the application (3 ATT + 1 reserve)
pub const ATT_OVERHEAD: usize = 4;

/// How frames reach the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// GATT indication: each frame blocks until the peer acknowledges it
    #[default]
    Confirmed,
    /// GATT notification: fire and forget, the sender throttles itself
    Unconfirmed,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::Confirmed => write!(f, "indicate"),
            DeliveryMode::Unconfirmed => write!(f, "notify"),
        }
    }
}

/// Errors reported by the platform stack
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GattError {
    #[error("Not connected")]
    NotConnected,
    #[error("Write failed: {0}")]
    WriteFailed(String),
    #[error("Indication not acknowledged: {0}")]
    IndicationFailed(String),
    #[error("BLE stack error: {0}")]
    StackError(String),
}

/// Characteristic property flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub indicate: bool,
    pub notify: bool,
}

impl CharacteristicProperties {
    /// Everything the pipe uses. Both indicate and notify are registered so
    /// the delivery mode can be switched while running.
    pub fn data_pipe() -> Self {
        Self {
            read: true,
            write: true,
            indicate: true,
            notify: true,
        }
    }

    pub fn supports(&self, mode: DeliveryMode) -> bool {
        match mode {
            DeliveryMode::Confirmed => self.indicate,
            DeliveryMode::Unconfirmed => self.notify,
        }
    }
}

/// What the stack must register and advertise
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub device_name: String,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub max_value_len: usize,
    pub preferred_mtu: u16,
}

/// Platform BLE peripheral stack
///
/// Implementations wrap the real stack. `indicate` must block until the peer
/// acknowledges the indication or the stack gives up.
#[cfg_attr(test, mockall::automock)]
pub trait GattPeripheral {
    /// Init the stack, register the service and characteristic, start advertising
    fn start(&mut self, service: &ServiceDefinition) -> Result<(), GattError>;

    /// Tear the stack down
    fn shutdown(&mut self);

    /// Become connectable again (after a disconnect)
    fn start_advertising(&mut self) -> Result<(), GattError>;

    /// Number of attached centrals
    fn connected_count(&self) -> usize;

    /// Negotiated ATT MTU of the first attached peer
    fn peer_mtu(&self) -> Option<u16>;

    /// Confirmed transmit of one frame
    fn indicate(&mut self, frame: &[u8]) -> Result<(), GattError>;

    /// Unconfirmed transmit of one frame
    fn notify(&mut self, frame: &[u8]) -> Result<(), GattError>;
}

/// Callbacks the stack delivers into the pipe.
///
/// Each call runs to completion before the next event is delivered.
pub trait PeripheralEvents {
    fn on_peer_connected(&mut self, mtu: u16);

    fn on_peer_disconnected(&mut self, reason: i32);

    /// One characteristic write from the central
    fn on_bytes_written(&mut self, data: &[u8]);

    fn on_mtu_changed(&mut self, _mtu: u16) {}
}
