//! # iot-bridge-core
//!
//! Shared library for the MQTT-to-serial IoT bridge containing the serial wire
//! codec, the message vocabulary spoken by the device, and the topic router
//! that turns bus commands into tagged device commands.
//!
//! This crate has zero dependencies on sockets, serial ports, or async
//! runtimes.  Everything here is a pure function of its inputs.
//!
//! # Architecture overview
//!
//! The bridge sits between an MQTT broker and a microcontroller attached over
//! a serial line.  Both directions carry JSON objects; the device side adds a
//! numeric `id` tag to every object so the firmware can dispatch on it without
//! knowing anything about MQTT topics.
//!
//! - **`protocol`** – How a JSON object becomes one newline-terminated line on
//!   the serial link and back, plus the tag values ([`CommandKind`],
//!   [`TELEMETRY_TAG`]) and the classification of device output.
//!
//! - **`routing`** – Which bus topic maps to which [`CommandKind`], and the
//!   per-topic normalization rules (e.g. the interval floor) applied before a
//!   command is tagged.

pub mod protocol;
pub mod routing;

// Re-export the most-used items at the crate root so callers can write
// `iot_bridge_core::route` instead of `iot_bridge_core::routing::router::route`.
pub use protocol::codec::{decode_line, encode_line, encode_payload, DecodeError};
pub use protocol::messages::{
    CommandKind, DeviceFrame, JsonObject, TelemetryMessage, ID_FIELD, TELEMETRY_TAG,
    TIMESTAMP_FIELD,
};
pub use routing::router::{route, RoutedCommand, ValidationError, INTERVAL_FIELD, INTERVAL_FLOOR};
pub use routing::topics::{telemetry_topic_for_prefix, TopicTable, DEFAULT_TOPIC_PREFIX};
