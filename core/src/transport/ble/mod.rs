/// BLE (Bluetooth Low Energy) Transport Module
///
/// Protocol-level pieces of the data pipe:
///
/// - **gatt**: service definition and the `GattPeripheral` stack seam
/// - **framer**: splits framed messages into MTU-sized indications/notifications
/// - **reassembler**: rebuilds messages from arbitrarily split characteristic writes
///
/// The platform stack that owns the radio implements `GattPeripheral` and
/// forwards its callbacks through `PeripheralEvents`. Everything here is
/// testable without BLE hardware.

pub mod framer;
pub mod gatt;
pub mod reassembler;

pub use framer::{
    frame_count, max_frame_size, AbortReason, FramePlan, Framer, SendOutcome, ThrottlePolicy,
};

pub use gatt::{
    CharacteristicProperties, DeliveryMode, GattError, GattPeripheral, PeripheralEvents,
    ServiceDefinition, ATT_OVERHEAD, DATAPIPE_CHARACTERISTIC_UUID, DATAPIPE_SERVICE_UUID,
    DEFAULT_MTU, MAX_CHARACTERISTIC_SIZE, PREFERRED_MTU,
};

pub use reassembler::{OverflowPolicy, Phase, Reassembler, DEFAULT_RX_CAPACITY};
