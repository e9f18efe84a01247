//! DataPipe: one typed message channel over one GATT characteristic
//!
//! The pipe owns the peripheral stack handle and every piece of per-link
//! state. Its lifetime is explicit: `new` builds it, `begin` brings the stack
//! up, `stop` (or drop) tears it down.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::PipeConfig;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::message::Message;
use crate::transport::ble::framer::{Framer, SendOutcome};
use crate::transport::ble::gatt::{DeliveryMode, GattPeripheral, PeripheralEvents};
use crate::transport::ble::reassembler::Reassembler;
use crate::transport::connection::{self, ConnectionState};
use crate::PipeError;

pub struct DataPipe<P: GattPeripheral> {
    config: PipeConfig,
    peripheral: P,
    framer: Framer,
    reassembler: Reassembler,
    dispatcher: Dispatcher,
    connection: Option<ConnectionState>,
    running: bool,
}

impl<P: GattPeripheral> DataPipe<P> {
    pub fn new(config: PipeConfig, peripheral: P) -> Result<Self, PipeError> {
        crate::init_tracing();
        config.validate()?;

        Ok(Self {
            framer: Framer::new(config.delivery_mode, config.throttle.clone()),
            reassembler: Reassembler::new(config.overflow, config.rx_capacity),
            dispatcher: Dispatcher::new(),
            connection: None,
            running: false,
            config,
            peripheral,
        })
    }

    // ------------------------------------------------------------------------
    // LIFECYCLE
    // ------------------------------------------------------------------------

    /// Register the service and start advertising
    pub fn begin(&mut self) -> Result<(), PipeError> {
        if self.running {
            return Err(PipeError::AlreadyRunning);
        }
        let service = self.config.service_definition();
        self.peripheral.start(&service)?;
        self.running = true;
        info!(
            "DataPipe '{}' started ({} mode)",
            self.config.device_name,
            self.framer.mode()
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.peripheral.shutdown();
        self.reassembler.reset();
        self.connection = None;
        self.running = false;
        info!("DataPipe '{}' stopped", self.config.device_name);
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Restart advertising, e.g. after the host stack dropped it
    pub fn advertise(&mut self) -> Result<(), PipeError> {
        if !self.running {
            return Err(PipeError::NotRunning);
        }
        self.peripheral.start_advertising()?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // SENDING
    // ------------------------------------------------------------------------

    /// Serialize `document` and send it as a JSON message
    pub fn send_json<T: Serialize + ?Sized>(&mut self, document: &T) -> SendOutcome {
        if !self.is_connected() {
            return SendOutcome::NotConnected;
        }
        match Message::json(document) {
            Ok(message) => self.send(&message),
            Err(e) => {
                warn!("Cannot send JSON document: {}", e);
                SendOutcome::Rejected(e)
            }
        }
    }

    pub fn send_binary(&mut self, kind: u8, data: &[u8]) -> SendOutcome {
        match Message::binary(kind, data) {
            Ok(message) => self.send(&message),
            Err(e) => {
                warn!("Cannot send type {} message: {}", kind, e);
                SendOutcome::Rejected(e)
            }
        }
    }

    pub fn send(&mut self, message: &Message) -> SendOutcome {
        if !self.running {
            debug!("Pipe not running, dropping type {} message", message.kind());
            return SendOutcome::NotConnected;
        }
        let recorded_mtu = self.connection.map(|c| c.mtu);
        self.framer
            .send_with_recorded_mtu(&mut self.peripheral, message, recorded_mtu)
    }

    // ------------------------------------------------------------------------
    // RECEIVING
    // ------------------------------------------------------------------------

    pub fn set_on_json<F>(&mut self, handler: F)
    where
        F: FnMut(&Value) + Send + 'static,
    {
        self.dispatcher.set_on_json(handler);
    }

    pub fn set_on_binary<F>(&mut self, handler: F)
    where
        F: FnMut(u8, &[u8]) + Send + 'static,
    {
        self.dispatcher.set_on_binary(handler);
    }

    // ------------------------------------------------------------------------
    // QUERIES / SETTINGS
    // ------------------------------------------------------------------------

    pub fn set_delivery_mode(&mut self, mode: DeliveryMode) {
        if self.framer.mode() != mode {
            info!("Delivery mode {} -> {}", self.framer.mode(), mode);
            self.framer.set_mode(mode);
        }
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.framer.mode()
    }

    pub fn is_connected(&self) -> bool {
        self.running && connection::is_connected(&self.peripheral)
    }

    /// Negotiated MTU, or the 23-byte default without a peer. When the stack
    /// cannot report the peer's MTU, the last connect/MTU event's value is used.
    pub fn mtu(&self) -> u16 {
        connection::negotiated_mtu_or(&self.peripheral, self.connection.map(|c| c.mtu))
    }

    pub fn connection(&self) -> Option<&ConnectionState> {
        self.connection.as_ref()
    }

    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    pub fn config(&self) -> &PipeConfig {
        &self.config
    }

    pub fn peripheral(&self) -> &P {
        &self.peripheral
    }

    pub fn peripheral_mut(&mut self) -> &mut P {
        &mut self.peripheral
    }
}

impl<P: GattPeripheral> PeripheralEvents for DataPipe<P> {
    fn on_peer_connected(&mut self, mtu: u16) {
        info!("Client connected (MTU {})", mtu);
        self.reassembler.reset();
        self.connection = Some(ConnectionState::new(mtu));
    }

    fn on_peer_disconnected(&mut self, reason: i32) {
        match self.connection.take() {
            Some(connection) => info!(
                "Client disconnected after {:.1?}: reason {}",
                connection.uptime(),
                reason
            ),
            None => info!("Client disconnected: reason {}", reason),
        }
        self.reassembler.reset();
        if !self.running {
            return;
        }
        if let Err(e) = self.peripheral.start_advertising() {
            warn!("Failed to restart advertising: {}", e);
        }
    }

    fn on_bytes_written(&mut self, data: &[u8]) {
        for message in self.reassembler.push(data) {
            let kind = message.kind();
            if self.dispatcher.dispatch(message) == DispatchOutcome::DecodeFailed {
                debug!("Type {} message dropped after decode failure", kind);
            }
        }
    }

    fn on_mtu_changed(&mut self, mtu: u16) {
        debug!("MTU changed to {}", mtu);
        if let Some(connection) = self.connection.as_mut() {
            connection.mtu = mtu;
        }
    }
}

impl<P: GattPeripheral> Drop for DataPipe<P> {
    fn drop(&mut self) {
        self.stop();
    }
}
