//! IoT MQTT⇄serial bridge: entry point.
//!
//! Subscribes to four command topics on an MQTT broker, re-encodes each
//! command as a tagged JSON line for a microcontroller on a serial port, and
//! republishes the device's telemetry lines on a single status topic.
//!
//! # Usage
//!
//! ```text
//! iot-bridge [OPTIONS]
//!
//! Options:
//!   --config <PATH>               TOML configuration file
//!   --mqtt-host <HOST>            Broker hostname [default: mqtt.eclipseprojects.io]
//!   --mqtt-port <PORT>            Broker port [default: 1883]
//!   --mqtt-client-id <ID>         Client identifier [default: iot-bridge-<uuid>]
//!   --mqtt-username <USER>        Broker username
//!   --mqtt-password <PASS>        Broker password
//!   --serial-path <PATH>          Serial device [default: /dev/cu.usbserial-0001]
//!   --baud-rate <BAUD>            Line speed [default: 115200]
//!   --read-timeout-ms <MS>        Serial read timeout [default: 1000]
//!   --topic-prefix <PREFIX>       Derive all five topic names from PREFIX
//!   --reconnect-delay-secs <SECS> Reconnect delay, 0 = never [default: 0]
//! ```
//!
//! # Configuration precedence
//!
//! Built-in defaults, then the `--config` file, then command-line flags (or
//! the matching `IOT_BRIDGE_*` environment variables).  A flag always wins
//! over the file.
//!
//! | Variable                        | Flag                      |
//! |---------------------------------|---------------------------|
//! | `IOT_BRIDGE_CONFIG`             | `--config`                |
//! | `IOT_BRIDGE_MQTT_HOST`          | `--mqtt-host`             |
//! | `IOT_BRIDGE_MQTT_PORT`          | `--mqtt-port`             |
//! | `IOT_BRIDGE_MQTT_CLIENT_ID`     | `--mqtt-client-id`        |
//! | `IOT_BRIDGE_MQTT_USERNAME`      | `--mqtt-username`         |
//! | `IOT_BRIDGE_MQTT_PASSWORD`      | `--mqtt-password`         |
//! | `IOT_BRIDGE_SERIAL_PATH`        | `--serial-path`           |
//! | `IOT_BRIDGE_BAUD_RATE`          | `--baud-rate`             |
//! | `IOT_BRIDGE_READ_TIMEOUT_MS`    | `--read-timeout-ms`       |
//! | `IOT_BRIDGE_TOPIC_PREFIX`       | `--topic-prefix`          |
//! | `IOT_BRIDGE_RECONNECT_DELAY_SECS` | `--reconnect-delay-secs` |
//!
//! # Lifecycle
//!
//! The bus loop runs on a Tokio task and the serial loop on a blocking
//! thread.  Each runs until Ctrl+C or until its own connection fails.  The
//! process exits with an error only if both loops ended in failure.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use iot_bridge::application::{BusIngress, DeviceIngress, SerialChannel, TelemetrySink};
use iot_bridge::domain::BridgeConfig;
use iot_bridge::infrastructure::{self, run_bus_loop, run_device_ingress, Shutdown};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// MQTT⇄serial bridge for a JSON-line microcontroller.
///
/// Every option is optional: anything not given on the command line comes
/// from the `--config` file, and anything not in the file takes its default.
#[derive(Debug, Default, Parser)]
#[command(
    name = "iot-bridge",
    about = "Bridge MQTT command/telemetry topics to a JSON-line serial device",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "IOT_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Broker hostname or IP address.
    #[arg(long, env = "IOT_BRIDGE_MQTT_HOST")]
    mqtt_host: Option<String>,

    /// Broker TCP port.
    #[arg(long, env = "IOT_BRIDGE_MQTT_PORT")]
    mqtt_port: Option<u16>,

    /// MQTT client identifier.
    #[arg(long, env = "IOT_BRIDGE_MQTT_CLIENT_ID")]
    mqtt_client_id: Option<String>,

    /// Broker username.
    #[arg(long, env = "IOT_BRIDGE_MQTT_USERNAME")]
    mqtt_username: Option<String>,

    /// Broker password.  Only sent together with a username.
    #[arg(long, env = "IOT_BRIDGE_MQTT_PASSWORD", hide_env_values = true)]
    mqtt_password: Option<String>,

    /// Serial device path, e.g. /dev/ttyUSB0 or COM3.
    #[arg(long, env = "IOT_BRIDGE_SERIAL_PATH")]
    serial_path: Option<String>,

    /// Serial line speed.
    #[arg(long, env = "IOT_BRIDGE_BAUD_RATE")]
    baud_rate: Option<u32>,

    /// Serial read timeout in milliseconds.
    #[arg(long, env = "IOT_BRIDGE_READ_TIMEOUT_MS")]
    read_timeout_ms: Option<u64>,

    /// Use `<PREFIX>/sampling_interval`, ..., `<PREFIX>/status` as topic names.
    #[arg(long, env = "IOT_BRIDGE_TOPIC_PREFIX")]
    topic_prefix: Option<String>,

    /// Seconds between reconnection attempts; 0 disables reconnection.
    #[arg(long, env = "IOT_BRIDGE_RECONNECT_DELAY_SECS")]
    reconnect_delay_secs: Option<u64>,
}

impl Cli {
    /// Layers the config file and the command-line overrides over the
    /// defaults, then validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// the final configuration is invalid.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                BridgeConfig::from_toml_str(&text)
                    .with_context(|| format!("invalid config file {}", path.display()))?
            }
            None => BridgeConfig::default(),
        };

        if let Some(host) = self.mqtt_host {
            config.mqtt.host = host;
        }
        if let Some(port) = self.mqtt_port {
            config.mqtt.port = port;
        }
        if let Some(client_id) = self.mqtt_client_id {
            config.mqtt.client_id = Some(client_id);
        }
        if let Some(username) = self.mqtt_username {
            config.mqtt.username = Some(username);
        }
        if let Some(password) = self.mqtt_password {
            config.mqtt.password = Some(password);
        }
        if let Some(path) = self.serial_path {
            config.serial.path = path;
        }
        if let Some(baud_rate) = self.baud_rate {
            config.serial.baud_rate = baud_rate;
        }
        if let Some(read_timeout_ms) = self.read_timeout_ms {
            config.serial.read_timeout_ms = read_timeout_ms;
        }
        if let Some(prefix) = self.topic_prefix {
            config.apply_topic_prefix(&prefix);
        }
        if let Some(secs) = self.reconnect_delay_secs {
            config.reconnect_delay_secs = secs;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `RUST_LOG` controls verbosity; raw bus and device traffic is at `debug`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_bridge_config()?;

    // ── Graceful shutdown signal ───────────────────────────────────────────────
    let shutdown = Shutdown::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                on_signal.trigger();
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    // ── Wiring ─────────────────────────────────────────────────────────────────
    let channel = Arc::new(SerialChannel::new());
    let (client, eventloop) = infrastructure::connect(&config.mqtt);
    let sink: Arc<dyn TelemetrySink> = Arc::new(client.clone());
    let device_ingress = DeviceIngress::new(sink, config.topics.telemetry.clone());
    let bus_ingress = Arc::new(BusIngress::new(config.topic_table(), Arc::clone(&channel)));
    let reconnect_delay = config.reconnect_delay();

    info!(
        "iot-bridge starting: broker={}, serial={} @ {} baud, telemetry topic '{}'",
        client.broker(),
        config.serial.path,
        config.serial.baud_rate,
        device_ingress.telemetry_topic()
    );

    // ── Device Ingress Loop (blocking thread) ──────────────────────────────────
    let serial_task = {
        let shutdown = shutdown.clone();
        let settings = config.serial.clone();
        tokio::task::spawn_blocking(move || {
            run_device_ingress(
                &settings,
                &channel,
                &device_ingress,
                shutdown.flag(),
                reconnect_delay,
            )
        })
    };

    // ── Bus Ingress Loop (async task) ──────────────────────────────────────────
    let bus_task = tokio::spawn(run_bus_loop(
        eventloop,
        client,
        bus_ingress,
        shutdown,
        reconnect_delay,
    ));

    let (serial_result, bus_result) = tokio::join!(serial_task, bus_task);
    let serial_failed = report("serial", serial_result.context("serial task panicked")?);
    let bus_failed = report("broker", bus_result.context("broker task panicked")?);

    if serial_failed && bus_failed {
        anyhow::bail!("both the serial link and the broker connection failed");
    }

    info!("iot-bridge stopped");
    Ok(())
}

/// Logs how one loop ended.  Returns `true` if it ended in failure.
fn report(side: &str, result: Result<(), infrastructure::ConnectionFailure>) -> bool {
    match result {
        Ok(()) => {
            info!("{side} loop stopped");
            false
        }
        Err(e) => {
            error!("{side} loop ended: {e}");
            true
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Writes `contents` to a fresh file under the system temp directory.
    fn temp_config(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("iot-bridge-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_cli_without_arguments_has_no_overrides() {
        let cli = Cli::parse_from(["iot-bridge"]);
        assert!(cli.config.is_none());
        assert!(cli.mqtt_host.is_none());
        assert!(cli.topic_prefix.is_none());
    }

    #[test]
    fn test_cli_mqtt_port_override() {
        let cli = Cli::parse_from(["iot-bridge", "--mqtt-port", "8883"]);
        assert_eq!(cli.mqtt_port, Some(8883));
    }

    #[test]
    fn test_cli_rejects_non_numeric_baud_rate() {
        let result = Cli::try_parse_from(["iot-bridge", "--baud-rate", "fast"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_into_bridge_config_defaults() {
        // Arrange: no file, no flags
        let cli = Cli::default();

        // Act
        let config = cli.into_bridge_config().unwrap();

        // Assert
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_into_bridge_config_flags_override_defaults() {
        let cli = Cli::parse_from([
            "iot-bridge",
            "--mqtt-host",
            "10.0.0.5",
            "--serial-path",
            "/dev/ttyUSB0",
            "--baud-rate",
            "9600",
            "--reconnect-delay-secs",
            "5",
        ]);
        let config = cli.into_bridge_config().unwrap();
        assert_eq!(config.mqtt.host, "10.0.0.5");
        assert_eq!(config.serial.path, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.reconnect_delay(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_into_bridge_config_topic_prefix() {
        let cli = Cli::parse_from(["iot-bridge", "--topic-prefix", "farm/greenhouse-2"]);
        let config = cli.into_bridge_config().unwrap();
        assert_eq!(config.topics.sampling_interval, "farm/greenhouse-2/sampling_interval");
        assert_eq!(config.topics.telemetry, "farm/greenhouse-2/status");
    }

    #[test]
    fn test_flag_wins_over_config_file() {
        // Arrange
        let path = temp_config("[mqtt]\nhost = \"from-file\"\nport = 1884\n");
        let cli = Cli {
            config: Some(path.clone()),
            mqtt_host: Some("from-flag".to_string()),
            ..Cli::default()
        };

        // Act
        let config = cli.into_bridge_config().unwrap();
        std::fs::remove_file(&path).unwrap();

        // Assert
        assert_eq!(config.mqtt.host, "from-flag");
        assert_eq!(config.mqtt.port, 1884);
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/iot-bridge.toml")),
            ..Cli::default()
        };
        assert!(cli.into_bridge_config().is_err());
    }

    #[test]
    fn test_malformed_config_file_is_error() {
        let path = temp_config("[mqtt\nhost = ");
        let cli = Cli {
            config: Some(path.clone()),
            ..Cli::default()
        };
        let result = cli.into_bridge_config();
        std::fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_override_is_error() {
        let cli = Cli {
            baud_rate: Some(0),
            ..Cli::default()
        };
        assert!(cli.into_bridge_config().is_err());
    }

    #[test]
    fn test_report_flags_failures() {
        let failure = infrastructure::ConnectionFailure::SerialClosed {
            path: "/dev/ttyUSB0".to_string(),
        };
        assert!(report("serial", Err(failure)));
        assert!(!report("broker", Ok(())));
    }
}
