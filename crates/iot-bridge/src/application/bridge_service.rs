//! Message handling for both directions of the bridge.
//!
//! This module is where the pure translation logic from `iot-bridge-core`
//! meets the two transports:
//!
//! - **Bus → device** ([`BusIngress`]): decode the MQTT payload, route it by
//!   topic, encode it as a serial line, and write it through the shared
//!   [`SerialChannel`].
//! - **Device → bus** ([`DeviceIngress`]): decode a serial line, classify it,
//!   and publish telemetry through a [`TelemetrySink`].
//!
//! Neither handler owns a socket or a port.  The serial port appears only as
//! the channel's writer and the broker only as the sink trait, so every path
//! here can be exercised with in-memory fakes.
//!
//! # Failure policy
//!
//! Every failure is confined to the single message that caused it.  The
//! `handle_*` methods return a [`BridgeError`] so callers (and tests) can see
//! exactly what happened; the `on_*` wrappers used by the event loops log the
//! outcome on the operator channel and return nothing.

use std::io;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use iot_bridge_core::{
    decode_line, encode_payload, route, CommandKind, DecodeError, DeviceFrame, JsonObject,
    RoutedCommand, TopicTable, ValidationError,
};

use crate::application::channel::{ChannelError, SerialChannel};

// ── Error type ────────────────────────────────────────────────────────────────

/// Per-message failures.  None of these stop either loop.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A command was routed and encoded, but no serial connection is open.
    /// The command is dropped, not queued.
    #[error("serial channel is not open; dropped {kind} command")]
    TransportUnavailable { kind: CommandKind },

    /// The payload or line is not a JSON object.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The payload does not satisfy its topic's rules.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The serial port rejected the write.
    #[error("failed to write {kind} command to the device: {source}")]
    Write {
        kind: CommandKind,
        #[source]
        source: io::Error,
    },

    /// The broker client refused the telemetry publish.
    #[error("failed to publish telemetry on '{topic}': {reason}")]
    Publish { topic: String, reason: String },
}

// ── Telemetry sink ────────────────────────────────────────────────────────────

/// Where telemetry goes once it has been stamped.
///
/// Implemented by the MQTT client in the infrastructure layer.  `publish` is
/// synchronous because it is called from the blocking serial thread; an
/// implementation should hand the payload off, not wait for the broker.
#[cfg_attr(test, mockall::automock)]
pub trait TelemetrySink: Send + Sync {
    /// Publishes `payload` on `topic`, fire-and-forget.
    ///
    /// Returns a human-readable reason if the publish could not be queued.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), String>;
}

// ── Bus → device ──────────────────────────────────────────────────────────────

/// Handles messages arriving on the command topics.
pub struct BusIngress {
    topics: TopicTable,
    channel: Arc<SerialChannel>,
}

impl BusIngress {
    pub fn new(topics: TopicTable, channel: Arc<SerialChannel>) -> Self {
        Self { topics, channel }
    }

    /// The topic table commands are routed against.
    pub fn topics(&self) -> &TopicTable {
        &self.topics
    }

    /// Decodes, routes, encodes, and writes one bus message.
    ///
    /// Returns the command that was written.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Decode`] if the payload is not a JSON object.
    /// - [`BridgeError::Validation`] if an interval command lacks a usable
    ///   `interval`.
    /// - [`BridgeError::TransportUnavailable`] if no serial connection is open.
    /// - [`BridgeError::Write`] if the port rejects the line.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> Result<RoutedCommand, BridgeError> {
        let object = decode_line(payload)?;
        let command = route(&self.topics, topic, object)?;
        let line = command.encode();

        match self.channel.write_line(&line) {
            Ok(()) => Ok(command),
            Err(ChannelError::Unavailable) => {
                Err(BridgeError::TransportUnavailable { kind: command.kind })
            }
            Err(ChannelError::Write(source)) => Err(BridgeError::Write {
                kind: command.kind,
                source,
            }),
        }
    }

    /// Event-loop entry point: handles one message and reports the outcome.
    pub fn on_message(&self, topic: &str, payload: &[u8]) {
        debug!("bus message on '{}': {}", topic, String::from_utf8_lossy(payload));

        match self.handle_message(topic, payload) {
            Ok(command) if command.kind == CommandKind::Unknown => {
                warn!(
                    "forwarded command from unrecognized topic '{}' with id {}",
                    topic,
                    CommandKind::Unknown.tag()
                );
            }
            Ok(command) => {
                info!("forwarded {} command to device", command.kind);
            }
            Err(e @ BridgeError::TransportUnavailable { .. }) => warn!("{e}"),
            Err(e) => error!("dropping message on '{}': {}", topic, e),
        }
    }
}

// ── Device → bus ──────────────────────────────────────────────────────────────

/// What became of one device line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// Telemetry was published; holds the stamped object.
    Published(JsonObject),
    /// A diagnostic line; logged, not published.
    Diagnostic(JsonObject),
    /// A blank line; nothing to do.
    Skipped,
}

/// Handles lines read from the device.
pub struct DeviceIngress {
    sink: Arc<dyn TelemetrySink>,
    telemetry_topic: String,
}

impl DeviceIngress {
    pub fn new(sink: Arc<dyn TelemetrySink>, telemetry_topic: impl Into<String>) -> Self {
        Self {
            sink,
            telemetry_topic: telemetry_topic.into(),
        }
    }

    /// The topic telemetry is published on.
    pub fn telemetry_topic(&self) -> &str {
        &self.telemetry_topic
    }

    /// Decodes and classifies one line; publishes it if it is telemetry.
    ///
    /// `now_unix` is the receipt time written into the `timestamp` field.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Decode`] if the line is not a JSON object.
    /// - [`BridgeError::Publish`] if the sink refuses the payload.
    pub fn handle_line(&self, line: &[u8], now_unix: u64) -> Result<LineOutcome, BridgeError> {
        if line.iter().all(u8::is_ascii_whitespace) {
            return Ok(LineOutcome::Skipped);
        }

        match DeviceFrame::classify(decode_line(line)?) {
            DeviceFrame::Telemetry(sample) => {
                let stamped = sample.stamp(now_unix);
                self.sink
                    .publish(&self.telemetry_topic, encode_payload(&stamped))
                    .map_err(|reason| BridgeError::Publish {
                        topic: self.telemetry_topic.clone(),
                        reason,
                    })?;
                Ok(LineOutcome::Published(stamped))
            }
            DeviceFrame::Diagnostic(object) => Ok(LineOutcome::Diagnostic(object)),
        }
    }

    /// Reader-loop entry point: handles one line at the current time and
    /// reports the outcome.
    pub fn on_line(&self, line: &[u8]) {
        debug!("device line: {}", String::from_utf8_lossy(line).trim_end());

        match self.handle_line(line, unix_now()) {
            Ok(LineOutcome::Published(_)) => {
                debug!("published telemetry on '{}'", self.telemetry_topic);
            }
            Ok(LineOutcome::Diagnostic(object)) => {
                info!("device: {}", serde_json::Value::Object(object));
            }
            Ok(LineOutcome::Skipped) => debug!("skipping blank device line"),
            Err(e) => error!("{e}"),
        }
    }

    /// Reader-loop entry point for a line the reader gave up buffering.
    /// `prefix` is what was buffered before the limit was hit.
    pub fn on_oversized_line(&self, prefix: &[u8]) {
        error!("{}", oversized_line_error(prefix));
    }
}

/// Leading bytes of an oversized line kept in its report.
const OVERSIZED_EXCERPT_BYTES: usize = 256;

fn oversized_line_error(prefix: &[u8]) -> DecodeError {
    DecodeError {
        raw: prefix[..prefix.len().min(OVERSIZED_EXCERPT_BYTES)].to_vec(),
        reason: format!("line exceeds {} bytes", prefix.len()),
    }
}

/// Seconds since the Unix epoch, or 0 if the clock is set before 1970.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
