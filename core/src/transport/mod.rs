// Transport module: GATT peripheral plumbing and link state

pub mod ble;
pub mod connection;
pub mod loopback;

pub use connection::{is_connected, negotiated_mtu, negotiated_mtu_or, ConnectionState};
pub use loopback::{LoopbackLink, LoopbackPeripheral, SentFrame};
