//! iot-bridge library crate.
//!
//! Connects an MQTT broker to a microcontroller that speaks newline-delimited
//! JSON over a serial port.
//!
//! # Architecture
//!
//! ```text
//! MQTT broker (command topics)          MQTT broker (telemetry topic)
//!         │                                        ▲
//!         ▼                                        │
//! [iot-bridge]                                     │
//!   ├── domain/          BridgeConfig (MQTT, serial, topics)
//!   ├── application/
//!   │     ├── channel/          SerialChannel: the shared write handle
//!   │     └── bridge_service/   BusIngress (route → encode → write)
//!   │                           DeviceIngress (decode → classify → publish)
//!   └── infrastructure/
//!         ├── mqtt_client/  rumqttc event loop, subscriptions, publisher
//!         ├── serial_conn/  serialport session and line reader
//!         └── shutdown/     stop request shared by both loops
//!         │                                        ▲
//!         ▼                                        │
//! Serial device (JSON lines, id-tagged) ───────────┘
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `iot-bridge-core`; it sees the
//!   serial port only as `std::io::Write` and the broker only as the
//!   [`application::TelemetrySink`] trait.
//! - `infrastructure` owns every real socket, port, and thread.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: shared channel handle and message handling.
pub mod application;

/// Infrastructure layer: MQTT event loop and serial port session.
pub mod infrastructure;
