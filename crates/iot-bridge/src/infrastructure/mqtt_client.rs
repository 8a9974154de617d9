//! Broker session: MQTT options, subscriptions, telemetry publishing, and
//! the Bus Ingress event loop.
//!
//! rumqttc splits a session into an [`AsyncClient`] (cheap to clone, queues
//! requests) and an [`EventLoop`] (owns the socket, must be polled).  The
//! event loop runs on a Tokio task in [`run_bus_loop`]; the client is wrapped
//! in [`BusClient`] and shared with the serial thread for publishing.
//!
//! # Subscriptions
//!
//! Sessions are clean, so the broker forgets subscriptions on every
//! disconnect.  The four command topics are therefore (re)subscribed on every
//! successful `CONNACK`, not once at startup.
//!
//! # Cancellation
//!
//! While no connection is up, one `poll()` covers DNS, TCP connect, `CONNECT`
//! and the wait for `CONNACK`.  Dropping that future throws the half-open
//! connection away, so `poll()` is only ever raced against the shutdown
//! signal, never against a timer.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use iot_bridge_core::TopicTable;

use crate::application::{BusIngress, TelemetrySink};
use crate::domain::MqttSettings;
use crate::infrastructure::{ConnectionFailure, Shutdown};

/// Capacity of the client's outgoing request queue.
pub const REQUEST_QUEUE_CAPACITY: usize = 64;

/// Builds rumqttc options from the broker settings.
///
/// A random `iot-bridge-<uuid>` client id is generated when none is
/// configured.  The password is only sent together with a username.
pub fn mqtt_options(settings: &MqttSettings) -> MqttOptions {
    let client_id = settings
        .client_id
        .clone()
        .unwrap_or_else(|| format!("iot-bridge-{}", Uuid::new_v4().simple()));

    let mut options = MqttOptions::new(client_id, settings.host.clone(), settings.port);
    options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs));
    options.set_clean_session(true);

    if let Some(username) = &settings.username {
        options.set_credentials(username.clone(), settings.password.clone().unwrap_or_default());
    }
    options
}

/// Creates the client/event-loop pair for `settings`.  No network I/O happens
/// until the event loop is polled.
pub fn connect(settings: &MqttSettings) -> (BusClient, EventLoop) {
    let (client, eventloop) = AsyncClient::new(mqtt_options(settings), REQUEST_QUEUE_CAPACITY);
    let broker = format!("{}:{}", settings.host, settings.port);
    (BusClient { client, broker }, eventloop)
}

// ── Client handle ─────────────────────────────────────────────────────────────

/// Something that can subscribe to a command topic.
pub trait CommandSubscriber {
    fn subscribe(&self, topic: &str) -> Result<(), String>;
}

/// Cloneable handle to the broker session.
///
/// All requests are queued with the non-blocking `try_*` calls, so the handle
/// is usable from the blocking serial thread as well as from async code.
#[derive(Clone)]
pub struct BusClient {
    client: AsyncClient,
    broker: String,
}

impl BusClient {
    /// `host:port` of the broker, for log messages.
    pub fn broker(&self) -> &str {
        &self.broker
    }

    /// Asks the broker to end the session.
    pub fn disconnect(&self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("disconnect request not queued: {e}");
        }
    }
}

impl TelemetrySink for BusClient {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), String> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| e.to_string())
    }
}

impl CommandSubscriber for BusClient {
    fn subscribe(&self, topic: &str) -> Result<(), String> {
        self.client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| e.to_string())
    }
}

/// Subscribes to every command topic in `topics`.  Returns how many
/// subscriptions were queued.
pub fn subscribe_all(subscriber: &impl CommandSubscriber, topics: &TopicTable) -> usize {
    topics
        .subscriptions()
        .filter(|(kind, topic)| match subscriber.subscribe(topic) {
            Ok(()) => {
                debug!("subscribed to '{topic}' ({kind})");
                true
            }
            Err(e) => {
                error!("failed to subscribe to '{topic}': {e}");
                false
            }
        })
        .count()
}

// ── Event dispatch ────────────────────────────────────────────────────────────

/// Reacts to one event from the broker session.
///
/// - `CONNACK` (accepted): subscribe to the command topics.
/// - `PUBLISH`: hand the message to the bus ingress handler.
///
/// A refused `CONNACK` never arrives here: rumqttc returns it from `poll()`
/// as [`ConnectionError::ConnectionRefused`], see [`session_error_message`].
pub fn dispatch_event(event: &Event, subscriber: &impl CommandSubscriber, ingress: &BusIngress) {
    match event {
        Event::Incoming(Packet::ConnAck(ack)) if ack.code == ConnectReturnCode::Success => {
            info!("connected to broker");
            let count = subscribe_all(subscriber, ingress.topics());
            info!("subscribed to {count} command topics");
        }
        Event::Incoming(Packet::Publish(publish)) => {
            ingress.on_message(&publish.topic, &publish.payload);
        }
        Event::Incoming(Packet::Disconnect) => warn!("broker closed the session"),
        _ => {}
    }
}

// ── Bus Ingress Loop ──────────────────────────────────────────────────────────

/// Describes a failed `poll()` for the operator log.
pub fn session_error_message(broker: &str, source: &ConnectionError) -> String {
    match source {
        ConnectionError::ConnectionRefused(code) => {
            format!("broker {broker} refused the connection: {code:?}")
        }
        other => format!("broker connection to {broker} lost: {other}"),
    }
}

/// Drives the broker session until shutdown.
///
/// With `reconnect_delay == None` the first connection error ends the loop
/// and is returned.  Otherwise the loop waits and polls again; rumqttc
/// reconnects on the next poll and the fresh `CONNACK` resubscribes.
///
/// # Errors
///
/// Returns [`ConnectionFailure::Bus`] when the session fails (including a
/// refused `CONNACK`) and reconnection is disabled.
pub async fn run_bus_loop(
    mut eventloop: EventLoop,
    client: BusClient,
    ingress: Arc<BusIngress>,
    shutdown: Shutdown,
    reconnect_delay: Option<Duration>,
) -> Result<(), ConnectionFailure> {
    let broker = client.broker().to_string();
    info!("connecting to broker {broker}");

    loop {
        let polled = tokio::select! {
            biased;
            () = shutdown.stopped() => break,
            polled = eventloop.poll() => polled,
        };

        match polled {
            Ok(event) => dispatch_event(&event, &client, &ingress),
            Err(source) => {
                let Some(delay) = reconnect_delay else {
                    return Err(ConnectionFailure::Bus { broker, source });
                };
                warn!(
                    "{}; retrying in {}s",
                    session_error_message(&broker, &source),
                    delay.as_secs_f32()
                );
                pause_while_running(delay, &shutdown).await;
            }
        }
    }

    info!("disconnecting from broker {broker}");
    client.disconnect();
    Ok(())
}

/// Sleeps for `delay` or until shutdown, whichever comes first.
async fn pause_while_running(delay: Duration, shutdown: &Shutdown) {
    tokio::select! {
        () = tokio::time::sleep(delay) => {}
        () = shutdown.stopped() => {}
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
