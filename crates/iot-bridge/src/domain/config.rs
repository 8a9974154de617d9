//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! It is built once at startup from, in increasing precedence: built-in
//! defaults, an optional TOML file, and CLI flags / environment variables.
//! Nothing in it changes while the bridge runs.
//!
//! ```toml
//! reconnect_delay_secs = 0
//!
//! [mqtt]
//! host = "mqtt.eclipseprojects.io"
//! port = 1883
//! keep_alive_secs = 60
//!
//! [serial]
//! path = "/dev/cu.usbserial-0001"
//! baud_rate = 115200
//! read_timeout_ms = 1000
//!
//! [topics]
//! sampling_interval = "d:/group5.iot/sampling_interval"
//! communication_interval = "d:/group5.iot/communication_interval"
//! minimum_threshold = "d:/group5.iot/minimum_threshold"
//! maximum_threshold = "d:/group5.iot/maximum_threshold"
//! telemetry = "d:/group5.iot/status"
//! ```
//!
//! Every field has a default, so a file only needs the keys it changes.

use std::time::Duration;

use iot_bridge_core::{telemetry_topic_for_prefix, CommandKind, TopicTable, DEFAULT_TOPIC_PREFIX};
use serde::Deserialize;
use thiserror::Error;

/// A configuration value that would make the bridge misbehave.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The TOML text could not be parsed or has unknown keys.
    #[error("failed to parse config TOML: {0}")]
    Parse(String),

    /// A field holds a value the bridge cannot use.
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// All runtime configuration for the bridge.
///
/// # Example
///
/// ```rust
/// use iot_bridge::domain::BridgeConfig;
///
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.mqtt.port, 1883);
/// assert_eq!(cfg.serial.baud_rate, 115_200);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Seconds to wait before re-opening a lost serial port or reconnecting a
    /// lost broker session.  `0` disables reconnection: a lost connection
    /// stays lost and the other side keeps running alone.
    #[serde(default)]
    pub reconnect_delay_secs: u64,
    #[serde(default)]
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub serial: SerialSettings,
    #[serde(default)]
    pub topics: TopicSettings,
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MqttSettings {
    /// Broker hostname or IP address.
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    /// Broker TCP port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// MQTT client identifier.  A random `iot-bridge-<uuid>` is used if absent.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Username for broker authentication.
    #[serde(default)]
    pub username: Option<String>,
    /// Password for broker authentication.  Ignored without a username.
    #[serde(default)]
    pub password: Option<String>,
    /// MQTT keep-alive interval in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

/// Serial port settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SerialSettings {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`.
    #[serde(default = "default_serial_path")]
    pub path: String,
    /// Line speed.  8N1 framing is always used.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-read timeout in milliseconds.  Bounds how long the reader waits
    /// before re-checking the shutdown flag; it is not a liveness limit.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

/// Bus topic names.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopicSettings {
    #[serde(default = "default_sampling_topic")]
    pub sampling_interval: String,
    #[serde(default = "default_communication_topic")]
    pub communication_interval: String,
    #[serde(default = "default_minimum_topic")]
    pub minimum_threshold: String,
    #[serde(default = "default_maximum_topic")]
    pub maximum_threshold: String,
    /// Topic that telemetry is published to.
    #[serde(default = "default_telemetry_topic")]
    pub telemetry: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_mqtt_host() -> String {
    "mqtt.eclipseprojects.io".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
/// Shortest keep-alive the MQTT client accepts.
const MIN_KEEP_ALIVE_SECS: u64 = 5;

fn default_keep_alive_secs() -> u64 {
    60
}
fn default_serial_path() -> String {
    "/dev/cu.usbserial-0001".to_string()
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_read_timeout_ms() -> u64 {
    1000
}
fn default_sampling_topic() -> String {
    default_command_topic(CommandKind::SamplingInterval)
}
fn default_communication_topic() -> String {
    default_command_topic(CommandKind::CommunicationInterval)
}
fn default_minimum_topic() -> String {
    default_command_topic(CommandKind::MinimumThreshold)
}
fn default_maximum_topic() -> String {
    default_command_topic(CommandKind::MaximumThreshold)
}
fn default_telemetry_topic() -> String {
    telemetry_topic_for_prefix(DEFAULT_TOPIC_PREFIX)
}

fn default_command_topic(kind: CommandKind) -> String {
    TopicTable::default()
        .topic_for(kind)
        .map(str::to_string)
        .unwrap_or_default()
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: None,
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            path: default_serial_path(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            sampling_interval: default_sampling_topic(),
            communication_interval: default_communication_topic(),
            minimum_threshold: default_minimum_topic(),
            maximum_threshold: default_maximum_topic(),
            telemetry: default_telemetry_topic(),
        }
    }
}

// ── Behaviour ─────────────────────────────────────────────────────────────────

impl BridgeConfig {
    /// Parses a TOML document.  Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML, a wrong value type,
    /// or an unknown key.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Checks that every field holds a usable value.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.trim().is_empty() {
            return Err(invalid("mqtt.host", "must not be empty"));
        }
        if self.mqtt.port == 0 {
            return Err(invalid("mqtt.port", "must be non-zero"));
        }
        if self.mqtt.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(invalid("mqtt.keep_alive_secs", "must be at least 5"));
        }
        if self.serial.path.trim().is_empty() {
            return Err(invalid("serial.path", "must not be empty"));
        }
        if self.serial.baud_rate == 0 {
            return Err(invalid("serial.baud_rate", "must be non-zero"));
        }
        if self.serial.read_timeout_ms == 0 {
            return Err(invalid("serial.read_timeout_ms", "must be at least 1"));
        }

        let topics = &self.topics;
        for (field, name) in [
            ("topics.sampling_interval", &topics.sampling_interval),
            ("topics.communication_interval", &topics.communication_interval),
            ("topics.minimum_threshold", &topics.minimum_threshold),
            ("topics.maximum_threshold", &topics.maximum_threshold),
            ("topics.telemetry", &topics.telemetry),
        ] {
            if name.is_empty() {
                return Err(invalid(field, "must not be empty"));
            }
            if name.contains(['+', '#']) {
                return Err(invalid(field, "wildcards are not allowed"));
            }
        }

        // Publishing telemetry onto a command topic would feed every sample
        // back to the device as a command.
        let table = self.topic_table();
        if table.kind_for(&topics.telemetry) != CommandKind::Unknown {
            return Err(invalid(
                "topics.telemetry",
                "must differ from every command topic",
            ));
        }

        Ok(())
    }

    /// Replaces all five topic names with the conventional ones under `prefix`.
    pub fn apply_topic_prefix(&mut self, prefix: &str) {
        let table = TopicTable::with_prefix(prefix);
        let name = |kind| table.topic_for(kind).map(str::to_string).unwrap_or_default();
        self.topics = TopicSettings {
            sampling_interval: name(CommandKind::SamplingInterval),
            communication_interval: name(CommandKind::CommunicationInterval),
            minimum_threshold: name(CommandKind::MinimumThreshold),
            maximum_threshold: name(CommandKind::MaximumThreshold),
            telemetry: telemetry_topic_for_prefix(prefix),
        };
    }

    /// The router's view of the command topics.
    pub fn topic_table(&self) -> TopicTable {
        TopicTable::new(
            self.topics.sampling_interval.clone(),
            self.topics.communication_interval.clone(),
            self.topics.minimum_threshold.clone(),
            self.topics.maximum_threshold.clone(),
        )
    }

    /// Delay between reconnection attempts, or `None` if reconnection is off.
    pub fn reconnect_delay(&self) -> Option<Duration> {
        (self.reconnect_delay_secs > 0).then(|| Duration::from_secs(self.reconnect_delay_secs))
    }
}

impl SerialSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
