/// Inbound reassembler: rebuilds messages from characteristic writes
///
/// Write boundaries carry no meaning. The machine parses a 3-byte header
/// (which may itself arrive split over several writes), then counts payload
/// bytes until the declared length is reached.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::message::{FrameHeader, Message, HEADER_SIZE};

/// Default receive buffer reservation
pub const DEFAULT_RX_CAPACITY: usize = 2048;

/// What to do with bytes that arrive after the current message is complete
/// within the same write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Treat them as the start of the next message
    #[default]
    Carry,
    /// Drop them
    Discard,
}

/// Where the machine is in the current message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingHeader,
    AccumulatingPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingHeader,
    Accumulating { kind: u8, expected: usize },
}

/// Per-connection receive accumulator
#[derive(Debug)]
pub struct Reassembler {
    state: State,
    header: Vec<u8>,
    buffer: Vec<u8>,
    rx_capacity: usize,
    overflow: OverflowPolicy,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(OverflowPolicy::default(), DEFAULT_RX_CAPACITY)
    }
}

impl Reassembler {
    pub fn new(overflow: OverflowPolicy, rx_capacity: usize) -> Self {
        Self {
            state: State::AwaitingHeader,
            header: Vec::with_capacity(HEADER_SIZE),
            buffer: Vec::with_capacity(rx_capacity),
            rx_capacity,
            overflow,
        }
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            State::AwaitingHeader => Phase::AwaitingHeader,
            State::Accumulating { .. } => Phase::AccumulatingPayload,
        }
    }

    pub fn header_received(&self) -> bool {
        matches!(self.state, State::Accumulating { .. })
    }

    pub fn expected_kind(&self) -> Option<u8> {
        match self.state {
            State::Accumulating { kind, .. } => Some(kind),
            State::AwaitingHeader => None,
        }
    }

    pub fn expected_len(&self) -> Option<usize> {
        match self.state {
            State::Accumulating { expected, .. } => Some(expected),
            State::AwaitingHeader => None,
        }
    }

    /// Payload bytes collected for the message in flight
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Header bytes collected while the header is still incomplete
    pub fn pending_header_len(&self) -> usize {
        self.header.len()
    }

    /// Bytes reserved for the receive buffer after every completed message
    pub fn rx_capacity(&self) -> usize {
        self.rx_capacity
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow
    }

    /// Whether nothing of a message is held
    pub fn is_idle(&self) -> bool {
        self.state == State::AwaitingHeader && self.header.is_empty() && self.buffer.is_empty()
    }

    /// Drop any partial message
    pub fn reset(&mut self) {
        if !self.is_idle() {
            debug!(
                "Discarding partial message ({} header + {} payload bytes)",
                self.header.len(),
                self.buffer.len()
            );
        }
        self.state = State::AwaitingHeader;
        self.header.clear();
        self.buffer.clear();
    }

    /// Feed one characteristic write. Returns the messages it completed,
    /// in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Message> {
        let mut completed = Vec::new();
        if chunk.is_empty() {
            return completed;
        }
        trace!("RX {} bytes in {:?}", chunk.len(), self.phase());

        let mut input = chunk;
        loop {
            match self.state {
                State::AwaitingHeader => {
                    let take = (HEADER_SIZE - self.header.len()).min(input.len());
                    self.header.extend_from_slice(&input[..take]);
                    input = &input[take..];

                    match FrameHeader::from_bytes(&self.header) {
                        Ok(header) => {
                            self.header.clear();
                            self.buffer.clear();
                            self.buffer.reserve(header.payload_len());
                            self.state = State::Accumulating {
                                kind: header.kind,
                                expected: header.payload_len(),
                            };
                            trace!(
                                "Header: type={}, length={}",
                                header.kind,
                                header.payload_len()
                            );
                        }
                        Err(_) => {
                            trace!("Partial header ({} bytes), waiting", self.header.len());
                            break;
                        }
                    }
                }
                State::Accumulating { expected, .. } => {
                    let owed = expected - self.buffer.len();
                    let take = owed.min(input.len());
                    self.buffer.extend_from_slice(&input[..take]);
                    input = &input[take..];
                }
            }

            if let State::Accumulating { kind, expected } = self.state {
                if self.buffer.len() >= expected {
                    let payload = std::mem::replace(
                        &mut self.buffer,
                        Vec::with_capacity(self.rx_capacity),
                    );
                    self.state = State::AwaitingHeader;
                    debug!("Message complete: type={}, {} bytes", kind, payload.len());
                    completed.push(Message::from_wire(kind, payload));
                }
            }

            if input.is_empty() {
                break;
            }
            if self.header_received() {
                // header just parsed, payload continues in this write
                continue;
            }
            match self.overflow {
                OverflowPolicy::Carry => {
                    trace!("{} bytes follow a completed message, parsing as next", input.len());
                }
                OverflowPolicy::Discard => {
                    warn!(
                        "Discarding {} bytes beyond the declared message length",
                        input.len()
                    );
                    break;
                }
            }
        }

        completed
    }
}
