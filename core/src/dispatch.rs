//! Type dispatch for completed inbound messages
//!
//! Type 0 goes through the JSON decoder to the JSON handler, every other
//! type goes to the binary handler untouched. A message without a matching
//! handler is dropped.

use serde_json::Value;
use tracing::{trace, warn};

use crate::message::{decode_json, Message};

pub type JsonHandler = Box<dyn FnMut(&Value) + Send>;
pub type BinaryHandler = Box<dyn FnMut(u8, &[u8]) + Send>;

/// What happened to a dispatched message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Json,
    Binary,
    /// JSON payload did not parse; no handler ran
    DecodeFailed,
    /// No handler registered for this type
    Dropped,
}

#[derive(Default)]
pub struct Dispatcher {
    on_json: Option<JsonHandler>,
    on_binary: Option<BinaryHandler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_json<F>(&mut self, handler: F)
    where
        F: FnMut(&Value) + Send + 'static,
    {
        self.on_json = Some(Box::new(handler));
    }

    pub fn set_on_binary<F>(&mut self, handler: F)
    where
        F: FnMut(u8, &[u8]) + Send + 'static,
    {
        self.on_binary = Some(Box::new(handler));
    }

    pub fn clear_handlers(&mut self) {
        self.on_json = None;
        self.on_binary = None;
    }

    pub fn has_json_handler(&self) -> bool {
        self.on_json.is_some()
    }

    pub fn has_binary_handler(&self) -> bool {
        self.on_binary.is_some()
    }

    /// Hand `message` to its handler. Runs on the caller's context; the
    /// handler must not block.
    pub fn dispatch(&mut self, message: Message) -> DispatchOutcome {
        if message.is_json() {
            let Some(handler) = self.on_json.as_mut() else {
                trace!("No JSON handler, dropping {} bytes", message.len());
                return DispatchOutcome::Dropped;
            };
            return match decode_json(message.payload()) {
                Ok(document) => {
                    handler(&document);
                    DispatchOutcome::Json
                }
                Err(e) => {
                    warn!("JSON decode failed ({} bytes): {}", message.len(), e);
                    DispatchOutcome::DecodeFailed
                }
            };
        }

        match self.on_binary.as_mut() {
            Some(handler) => {
                handler(message.kind(), message.payload());
                DispatchOutcome::Binary
            }
            None => {
                trace!("No binary handler, dropping type {}", message.kind());
                DispatchOutcome::Dropped
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("on_json", &self.on_json.is_some())
            .field("on_binary", &self.on_binary.is_some())
            .finish()
    }
}
