//! Application layer for iot-bridge.
//!
//! Message handling for both directions plus the shared serial write handle.
//! No sockets or ports are opened here; see `infrastructure` for that.

pub mod bridge_service;
pub mod channel;

pub use bridge_service::{unix_now, BridgeError, BusIngress, DeviceIngress, LineOutcome, TelemetrySink};
pub use channel::{ChannelError, ChannelLease, ChannelWriter, SerialChannel};
