// Message module: typed messages and their wire header

pub mod types;
pub mod codec;

pub use types::{Message, MAX_PAYLOAD_SIZE, TYPE_JSON};
pub use codec::{decode_json, encode_framed, encode_json, CodecError, FrameHeader, HEADER_SIZE};
