// Message codec: the 3-byte wire header and the JSON payload encoding
//
// Wire layout of one message:
//
//   byte 0     type tag
//   bytes 1-2  payload length, little-endian
//   bytes 3..  payload

use serde::Serialize;
use thiserror::Error;

use super::types::Message;

/// Size of the message header in bytes
pub const HEADER_SIZE: usize = 3;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("Header too short: {0} bytes")]
    HeaderTooShort(usize),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Header carried at the start of the first frame of every message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: u8,
    pub length: u16,
}

impl FrameHeader {
    pub fn new(kind: u8, length: u16) -> Self {
        Self { kind, length }
    }

    /// Header describing `message`. Every `Message` constructor bounds the
    /// payload to [`MAX_PAYLOAD_SIZE`](super::MAX_PAYLOAD_SIZE), so the length always fits.
    pub fn for_message(message: &Message) -> Self {
        Self::new(message.kind(), message.len() as u16)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let len = self.length.to_le_bytes();
        [self.kind, len[0], len[1]]
    }

    /// Parse the first [`HEADER_SIZE`] bytes; anything after is ignored
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CodecError::HeaderTooShort(bytes.len()));
        }
        Ok(Self {
            kind: bytes[0],
            length: u16::from_le_bytes([bytes[1], bytes[2]]),
        })
    }

    pub fn payload_len(&self) -> usize {
        self.length as usize
    }
}

/// Header followed by payload, ready to be sliced into frames
pub fn encode_framed(message: &Message) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + message.len());
    bytes.extend_from_slice(&FrameHeader::for_message(message).to_bytes());
    bytes.extend_from_slice(message.payload());
    bytes
}

pub fn encode_json<T: Serialize + ?Sized>(document: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(document)?)
}

pub fn decode_json(bytes: &[u8]) -> Result<serde_json::Value, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}
