// Message types: what the application hands to the pipe and gets back

use serde::Serialize;

use super::codec::{encode_json, CodecError};

/// Type tag reserved for JSON documents. Every other tag is an
/// application-defined binary kind.
pub const TYPE_JSON: u8 = 0x00;

/// Largest payload the 16-bit length field can describe
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// A complete logical message: one type tag plus its payload bytes.
///
/// Built by the application on the way out, rebuilt by the
/// [`Reassembler`](crate::transport::ble::Reassembler) on the way in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: u8,
    /// Never more than [`MAX_PAYLOAD_SIZE`] bytes
    payload: Vec<u8>,
}

impl Message {
    /// Create a message, rejecting payloads the header cannot describe
    pub fn new(kind: u8, payload: Vec<u8>) -> Result<Self, CodecError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(CodecError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self { kind, payload })
    }

    /// Serialize a document as a JSON message
    pub fn json<T: Serialize + ?Sized>(document: &T) -> Result<Self, CodecError> {
        Self::new(TYPE_JSON, encode_json(document)?)
    }

    /// Copy raw bytes into a binary message of the given kind
    pub fn binary(kind: u8, data: &[u8]) -> Result<Self, CodecError> {
        Self::new(kind, data.to_vec())
    }

    /// Rebuild a message whose length came off the wire, so it already fits
    /// the 16-bit length field
    pub(crate) fn from_wire(kind: u8, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD_SIZE);
        Self { kind, payload }
    }

    /// Type tag (0 = JSON)
    pub fn kind(&self) -> u8 {
        self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn is_json(&self) -> bool {
        self.kind == TYPE_JSON
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
