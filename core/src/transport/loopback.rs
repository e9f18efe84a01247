//! In-memory peripheral stack
//!
//! Records every frame the pipe transmits instead of putting it on the air.
//! Whoever holds the [`LoopbackLink`] plays the central: it attaches and
//! detaches the peer, drains transmitted frames, and can inject faults.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use super::ble::gatt::{DeliveryMode, GattError, GattPeripheral, ServiceDefinition, DEFAULT_MTU};

/// One frame as it left the peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub mode: DeliveryMode,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
struct LinkState {
    service: Option<ServiceDefinition>,
    advertising: bool,
    advertise_count: usize,
    connected: bool,
    mtu: u16,
    frames: Vec<SentFrame>,
    transmitted: usize,
    fail_transmit_at: Option<usize>,
    drop_after: Option<usize>,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            service: None,
            advertising: false,
            advertise_count: 0,
            connected: false,
            mtu: DEFAULT_MTU,
            frames: Vec::new(),
            transmitted: 0,
            fail_transmit_at: None,
            drop_after: None,
        }
    }
}

/// Shared handle on the simulated radio link
#[derive(Debug, Clone, Default)]
pub struct LoopbackLink {
    inner: Arc<Mutex<LinkState>>,
}

impl LoopbackLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A peripheral stack bound to this link
    pub fn peripheral(&self) -> LoopbackPeripheral {
        LoopbackPeripheral { link: self.clone() }
    }

    /// Attach a central with the given MTU. Advertising stops, as on a real
    /// single-connection peripheral.
    pub fn connect(&self, mtu: u16) {
        let mut state = self.inner.lock();
        state.connected = true;
        state.mtu = mtu;
        state.advertising = false;
    }

    pub fn disconnect(&self) {
        self.inner.lock().connected = false;
    }

    pub fn set_mtu(&self, mtu: u16) {
        self.inner.lock().mtu = mtu;
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    pub fn is_advertising(&self) -> bool {
        self.inner.lock().advertising
    }

    /// How many times advertising was (re)started
    pub fn advertise_count(&self) -> usize {
        self.inner.lock().advertise_count
    }

    /// The registered service, while the stack is up
    pub fn service(&self) -> Option<ServiceDefinition> {
        self.inner.lock().service.clone()
    }

    /// Drain the frames transmitted so far
    pub fn take_frames(&self) -> Vec<SentFrame> {
        std::mem::take(&mut self.inner.lock().frames)
    }

    pub fn pending_frames(&self) -> usize {
        self.inner.lock().frames.len()
    }

    /// Make the `index`-th transmit (0-based, counted over the link's
    /// lifetime) fail
    pub fn fail_transmit_at(&self, index: usize) {
        self.inner.lock().fail_transmit_at = Some(index);
    }

    /// Drop the central once `frames` frames have been transmitted in total
    pub fn drop_after(&self, frames: usize) {
        self.inner.lock().drop_after = Some(frames);
    }

    fn transmit(&self, mode: DeliveryMode, frame: &[u8]) -> Result<(), GattError> {
        let mut state = self.inner.lock();
        if !state.connected {
            return Err(GattError::NotConnected);
        }
        if state.fail_transmit_at == Some(state.transmitted) {
            state.fail_transmit_at = None;
            return Err(match mode {
                DeliveryMode::Confirmed => GattError::IndicationFailed("injected".into()),
                DeliveryMode::Unconfirmed => GattError::WriteFailed("injected".into()),
            });
        }

        state.frames.push(SentFrame {
            mode,
            bytes: frame.to_vec(),
        });
        state.transmitted += 1;
        if state.drop_after == Some(state.transmitted) {
            debug!("Loopback dropping central after {} frames", state.transmitted);
            state.connected = false;
        }
        Ok(())
    }
}

/// [`GattPeripheral`] over a [`LoopbackLink`]
#[derive(Debug, Clone)]
pub struct LoopbackPeripheral {
    link: LoopbackLink,
}

impl LoopbackPeripheral {
    pub fn link(&self) -> &LoopbackLink {
        &self.link
    }
}

impl GattPeripheral for LoopbackPeripheral {
    fn start(&mut self, service: &ServiceDefinition) -> Result<(), GattError> {
        let mut state = self.link.inner.lock();
        if state.service.is_some() {
            return Err(GattError::StackError("stack already initialized".into()));
        }
        state.service = Some(service.clone());
        state.advertising = true;
        state.advertise_count += 1;
        debug!("Loopback advertising as '{}'", service.device_name);
        Ok(())
    }

    fn shutdown(&mut self) {
        let mut state = self.link.inner.lock();
        state.service = None;
        state.advertising = false;
        state.connected = false;
    }

    fn start_advertising(&mut self) -> Result<(), GattError> {
        let mut state = self.link.inner.lock();
        if state.service.is_none() {
            return Err(GattError::StackError("stack not initialized".into()));
        }
        state.advertising = true;
        state.advertise_count += 1;
        Ok(())
    }

    fn connected_count(&self) -> usize {
        usize::from(self.link.inner.lock().connected)
    }

    fn peer_mtu(&self) -> Option<u16> {
        let state = self.link.inner.lock();
        state.connected.then_some(state.mtu)
    }

    fn indicate(&mut self, frame: &[u8]) -> Result<(), GattError> {
        self.link.transmit(DeliveryMode::Confirmed, frame)
    }

    fn notify(&mut self, frame: &[u8]) -> Result<(), GattError> {
        self.link.transmit(DeliveryMode::Unconfirmed, frame)
    }
}
