//! Infrastructure layer for iot-bridge.
//!
//! The infrastructure layer handles all I/O: the broker session and the serial
//! port.
//!
//! # Responsibilities
//!
//! - Building MQTT options and driving the rumqttc event loop
//! - Subscribing to the command topics on every (re)connect
//! - Publishing telemetry without blocking the serial thread
//! - Opening the serial port, installing its writer in the shared channel,
//!   and reading device lines
//! - Reconnect supervision and the graceful shutdown signal
//!
//! # What does NOT belong here?
//!
//! - Translation and tagging rules (that is `iot-bridge-core`)
//! - Per-message handling and error reporting (that is the application layer)
//! - Configuration parsing (that is done in `main.rs` and the domain layer)

use std::io;

use thiserror::Error;

pub mod mqtt_client;
pub mod serial_conn;
pub mod shutdown;

pub use mqtt_client::{connect, mqtt_options, run_bus_loop, BusClient, CommandSubscriber};
pub use serial_conn::{
    open_port, read_device_lines, run_device_ingress, run_serial_session, MAX_LINE_BYTES,
};
pub use shutdown::Shutdown;

/// A transport-level failure.  Fatal to the loop that owns the transport; the
/// other loop keeps running.
#[derive(Debug, Error)]
pub enum ConnectionFailure {
    /// The serial port could not be opened (or its writer cloned).
    #[error("cannot open serial port {path}: {source}")]
    SerialOpen {
        path: String,
        #[source]
        source: serialport::Error,
    },

    /// Reading from an open serial port failed.
    #[error("serial port {path} read failed: {source}")]
    SerialRead {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The serial stream reached end-of-file (device unplugged).
    #[error("serial port {path} was closed")]
    SerialClosed { path: String },

    /// The broker session failed.
    #[error("broker connection to {broker} failed: {source}")]
    Bus {
        broker: String,
        #[source]
        source: rumqttc::ConnectionError,
    },
}
