//! Protocol module containing the device message vocabulary and the line codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_line, encode_line, encode_payload, DecodeError};
pub use messages::*;
