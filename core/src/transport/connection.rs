//! Connection bookkeeping and the connection / MTU queries
//!
//! The pipe assumes a single peer. The stack stays authoritative for whether
//! a peer is attached; [`ConnectionState`] remembers what the connect and
//! MTU events reported, which stands in when the stack has no MTU to give.

use std::time::{Duration, Instant};

use super::ble::gatt::{GattPeripheral, DEFAULT_MTU};

/// The one live connection, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    /// Last ATT MTU reported by the connect or MTU-change event
    pub mtu: u16,
    pub connected_at: Instant,
}

impl ConnectionState {
    pub fn new(mtu: u16) -> Self {
        Self {
            mtu,
            connected_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Whether at least one peer is attached
pub fn is_connected<P: GattPeripheral + ?Sized>(peripheral: &P) -> bool {
    peripheral.connected_count() > 0
}

/// Negotiated MTU of the attached peer, or [`DEFAULT_MTU`] when there is none
pub fn negotiated_mtu<P: GattPeripheral + ?Sized>(peripheral: &P) -> u16 {
    negotiated_mtu_or(peripheral, None)
}

/// Like [`negotiated_mtu`], but a connected peer whose MTU the stack cannot
/// report falls back to `recorded` before the default
pub fn negotiated_mtu_or<P: GattPeripheral + ?Sized>(peripheral: &P, recorded: Option<u16>) -> u16 {
    if !is_connected(peripheral) {
        return DEFAULT_MTU;
    }
    peripheral.peer_mtu().or(recorded).unwrap_or(DEFAULT_MTU)
}
