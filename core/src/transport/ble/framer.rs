/// Outbound framer: header + payload sliced into MTU-sized frames
///
/// The first frame of a message starts with the 3-byte header, later frames
/// are pure payload continuation. Frames carry no metadata of their own; the
/// receiver counts bytes against the declared length.

use serde::{Deserialize, Serialize};
use std::slice::Chunks;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::gatt::{DeliveryMode, GattError, GattPeripheral, ATT_OVERHEAD};
use crate::message::{encode_framed, CodecError, Message, HEADER_SIZE};
use crate::transport::connection::{is_connected, negotiated_mtu_or};

/// Smallest frame that still carries a whole header
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE;

/// Largest frame one transport write can carry at `mtu`
pub fn max_frame_size(mtu: u16) -> usize {
    (mtu as usize).saturating_sub(ATT_OVERHEAD)
}

/// Number of frames needed for `total_len` framed bytes
pub fn frame_count(total_len: usize, max_frame: usize) -> usize {
    if max_frame == 0 {
        return 0;
    }
    total_len.div_ceil(max_frame)
}

/// A message laid out for one MTU
#[derive(Debug, Clone)]
pub struct FramePlan {
    bytes: Vec<u8>,
    max_frame: usize,
}

impl FramePlan {
    /// Lay out `message` for `mtu`. `None` when the MTU cannot carry a header.
    pub fn new(message: &Message, mtu: u16) -> Option<Self> {
        let max_frame = max_frame_size(mtu);
        if max_frame < MIN_FRAME_SIZE {
            return None;
        }
        Some(Self {
            bytes: encode_framed(message),
            max_frame,
        })
    }

    pub fn frames(&self) -> Chunks<'_, u8> {
        self.bytes.chunks(self.max_frame)
    }

    pub fn frame_count(&self) -> usize {
        frame_count(self.bytes.len(), self.max_frame)
    }

    /// Header plus payload length
    pub fn total_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    pub fn is_single_frame(&self) -> bool {
        self.bytes.len() <= self.max_frame
    }
}

/// Pacing between unconfirmed frames so the receiver's queue keeps up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottlePolicy {
    /// Gap for messages of up to `long_after_frames` frames
    pub short_ms: u64,
    /// Gap for longer messages
    pub long_ms: u64,
    pub long_after_frames: usize,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            short_ms: 5,
            long_ms: 10,
            long_after_frames: 10,
        }
    }
}

impl ThrottlePolicy {
    /// No pacing at all
    pub fn none() -> Self {
        Self {
            short_ms: 0,
            long_ms: 0,
            long_after_frames: 0,
        }
    }

    /// Gap between consecutive frames of a message of `frames` frames.
    /// Single-frame messages never wait.
    pub fn delay_for(&self, frames: usize) -> Duration {
        if frames <= 1 {
            return Duration::ZERO;
        }
        if frames > self.long_after_frames {
            Duration::from_millis(self.long_ms)
        } else {
            Duration::from_millis(self.short_ms)
        }
    }
}

/// Why a multi-frame send stopped early
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    Disconnected,
    TransmitFailed(GattError),
}

/// Result of a send. Sending is best-effort, so none of these is an error
/// the caller has to handle.
#[derive(Debug)]
pub enum SendOutcome {
    Sent { frames: usize },
    /// No peer attached; nothing was transmitted
    NotConnected,
    /// The negotiated MTU cannot carry even a header
    FrameTooSmall { mtu: u16 },
    /// Some frames went out, the rest were skipped
    Aborted {
        sent: usize,
        total: usize,
        reason: AbortReason,
    },
    /// The message could not be built
    Rejected(CodecError),
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent { .. })
    }
}

/// Sends messages through a [`GattPeripheral`] in one delivery mode
#[derive(Debug, Clone)]
pub struct Framer {
    mode: DeliveryMode,
    throttle: ThrottlePolicy,
}

impl Framer {
    pub fn new(mode: DeliveryMode, throttle: ThrottlePolicy) -> Self {
        Self { mode, throttle }
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: DeliveryMode) {
        self.mode = mode;
    }

    pub fn throttle(&self) -> &ThrottlePolicy {
        &self.throttle
    }

    /// Gap this framer inserts between frames of a `frames`-frame message
    pub fn inter_frame_delay(&self, frames: usize) -> Duration {
        match self.mode {
            // indicate already waits for the peer's ACK
            DeliveryMode::Confirmed => Duration::ZERO,
            DeliveryMode::Unconfirmed => self.throttle.delay_for(frames),
        }
    }

    /// Frame `message` and push it out, blocking for confirmations and pacing
    pub fn send<P: GattPeripheral + ?Sized>(
        &self,
        peripheral: &mut P,
        message: &Message,
    ) -> SendOutcome {
        self.send_with_recorded_mtu(peripheral, message, None)
    }

    /// [`send`](Self::send), sizing frames from `recorded_mtu` when the stack
    /// cannot report the peer's MTU
    pub fn send_with_recorded_mtu<P: GattPeripheral + ?Sized>(
        &self,
        peripheral: &mut P,
        message: &Message,
        recorded_mtu: Option<u16>,
    ) -> SendOutcome {
        if !is_connected(peripheral) {
            debug!("Dropping type {} message: no peer connected", message.kind());
            return SendOutcome::NotConnected;
        }

        let mtu = negotiated_mtu_or(peripheral, recorded_mtu);
        let Some(plan) = FramePlan::new(message, mtu) else {
            warn!("MTU {} too small to carry a message header", mtu);
            return SendOutcome::FrameTooSmall { mtu };
        };

        let total = plan.frame_count();
        let delay = self.inter_frame_delay(total);
        debug!(
            "Sending type {} ({} payload bytes, {} framed) as {} frame(s) via {}, MTU {}",
            message.kind(),
            message.len(),
            plan.total_len(),
            total,
            self.mode,
            mtu
        );

        for (index, frame) in plan.frames().enumerate() {
            if index > 0 {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                if !is_connected(peripheral) {
                    warn!("Peer disconnected after {}/{} frames", index, total);
                    return SendOutcome::Aborted {
                        sent: index,
                        total,
                        reason: AbortReason::Disconnected,
                    };
                }
            }

            trace!(
                "Frame {}/{}: offset={}, size={}, bytes={}",
                index + 1,
                total,
                index * plan.max_frame(),
                frame.len(),
                hex::encode(frame)
            );

            if let Err(e) = self.transmit(peripheral, frame) {
                warn!("Transmit failed after {}/{} frames: {}", index, total, e);
                return SendOutcome::Aborted {
                    sent: index,
                    total,
                    reason: AbortReason::TransmitFailed(e),
                };
            }
        }

        debug!("Sent {} bytes in {} frame(s)", plan.total_len(), total);
        SendOutcome::Sent { frames: total }
    }

    fn transmit<P: GattPeripheral + ?Sized>(
        &self,
        peripheral: &mut P,
        frame: &[u8],
    ) -> Result<(), GattError> {
        match self.mode {
            DeliveryMode::Confirmed => peripheral.indicate(frame),
            DeliveryMode::Unconfirmed => peripheral.notify(frame),
        }
    }
}
