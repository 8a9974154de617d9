//! Line codec for the serial link.
//!
//! Wire format:
//! ```text
//! {"key":value,...,"id":<tag>}\n
//! ```
//! One compact JSON object per line, UTF-8, terminated by a single `\n`.
//! The same codec parses inbound MQTT payloads, which are bare JSON objects
//! without the trailing newline.

use serde_json::Value;
use thiserror::Error;

use crate::protocol::messages::JsonObject;

/// Line terminator appended by [`encode_line`].
pub const LINE_DELIMITER: u8 = b'\n';

/// A line (or bus payload) that could not be parsed into a JSON object.
///
/// Carries the raw bytes so the operator can see exactly what the device or
/// publisher sent.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("malformed line ({reason}): {:?}", String::from_utf8_lossy(&self.raw))]
pub struct DecodeError {
    /// The bytes as received, including any trailing line terminator.
    pub raw: Vec<u8>,
    /// Why parsing failed.
    pub reason: String,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a JSON object as one newline-terminated line.
///
/// Serializing a `Map<String, Value>` cannot fail: every key is a string and
/// every value is already valid JSON, so this function is infallible.
///
/// # Examples
///
/// ```rust
/// use iot_bridge_core::protocol::encode_line;
/// use serde_json::json;
///
/// let obj = json!({"value": 10, "id": 3}).as_object().cloned().unwrap();
/// assert_eq!(encode_line(&obj), b"{\"value\":10,\"id\":3}\n");
/// ```
pub fn encode_line(object: &JsonObject) -> Vec<u8> {
    let mut line = encode_payload(object);
    line.push(LINE_DELIMITER);
    line
}

/// Encodes a JSON object as compact JSON without a line terminator, the form
/// published on the bus.
///
/// Numbers that came from [`decode_line`] are written with their original
/// text, so `18446744073709551616` or `0.10` pass through unchanged.
pub fn encode_payload(object: &JsonObject) -> Vec<u8> {
    // `Value`'s `Display` writes compact JSON and has no failure path, unlike
    // the generic `to_vec`, which has to account for arbitrary `Serialize` impls.
    Value::Object(object.clone()).to_string().into_bytes()
}

/// Decodes one line into a JSON object.
///
/// Surrounding whitespace (including `\r\n`) is ignored.  Bytes that are not
/// valid UTF-8 are replaced with U+FFFD before parsing, so line noise inside a
/// string value does not cost the whole sample.
///
/// # Errors
///
/// Returns [`DecodeError`] if the text is not valid JSON or is valid JSON but
/// not an object.
///
/// # Examples
///
/// ```rust
/// use iot_bridge_core::protocol::decode_line;
///
/// let obj = decode_line(b"{\"id\":5,\"temp\":21.5}\r\n").unwrap();
/// assert_eq!(obj["id"], 5);
/// assert!(decode_line(b"{not json").is_err());
/// ```
pub fn decode_line(bytes: &[u8]) -> Result<JsonObject, DecodeError> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(DecodeError {
            raw: bytes.to_vec(),
            reason: format!("expected a JSON object, found {}", json_kind(&other)),
        }),
        Err(e) => Err(DecodeError {
            raw: bytes.to_vec(),
            reason: e.to_string(),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
