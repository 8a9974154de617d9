//! Domain layer for iot-bridge.
//!
//! Pure configuration types with no dependencies on I/O, sockets, serial ports,
//! or async runtimes.  Reading the config file and parsing CLI arguments happen
//! in `main.rs`; this layer only describes and validates the result.

pub mod config;

pub use config::{BridgeConfig, ConfigError, MqttSettings, SerialSettings, TopicSettings};
