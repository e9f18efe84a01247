// DataPipe Core: typed messages over a single BLE GATT characteristic
//
// Framing, reassembly and type dispatch are platform-neutral. The radio
// itself sits behind `GattPeripheral`; anything that can indicate or notify
// a characteristic value can carry a pipe.

pub mod config;
pub mod dispatch;
pub mod message;
pub mod pipe;
pub mod transport;

use thiserror::Error;

pub use config::{ConfigError, PipeConfig};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use message::{CodecError, FrameHeader, Message, HEADER_SIZE, TYPE_JSON};
pub use pipe::DataPipe;
pub use transport::ble::{
    AbortReason, DeliveryMode, FramePlan, Framer, GattError, GattPeripheral, OverflowPolicy,
    PeripheralEvents, Reassembler, SendOutcome, ThrottlePolicy,
};
pub use transport::{LoopbackLink, LoopbackPeripheral};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error)]
pub enum PipeError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("Already running")]
    AlreadyRunning,
    #[error("Not running")]
    NotRunning,
    #[error("GATT stack error: {0}")]
    Gatt(#[from] GattError),
}

/// Install the fmt subscriber, filtered by `RUST_LOG` (default `info`).
/// Safe to call more than once; a subscriber installed by the host wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}
