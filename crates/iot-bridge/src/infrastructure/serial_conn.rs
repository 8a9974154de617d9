//! Serial port session and the device line reader.
//!
//! The serial port is driven with blocking I/O on a dedicated thread (the
//! caller runs [`run_device_ingress`] inside `tokio::task::spawn_blocking`).
//! Each read waits at most `read_timeout_ms`, after which the reader re-checks
//! the shutdown flag, so a quiet device never pins the process open.
//!
//! # Session lifecycle
//!
//! ```text
//! open_port ──► try_clone ──► channel.install(writer) ──► read_device_lines
//!                                                              │
//!               lease dropped (channel cleared) ◄── EOF / error / shutdown
//! ```
//!
//! # Line framing
//!
//! A read can time out half-way through a line.  The partial bytes stay in a
//! buffer that lives across reads, so a line split by a timeout is still
//! delivered whole once the rest arrives.
//!
//! A line is at most [`MAX_LINE_BYTES`] long.  Longer input (typically noise
//! at the wrong baud rate) is reported once as a decode error and skipped up
//! to the next newline.

use std::io::{self, BufRead, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info, warn};

use iot_bridge_core::protocol::codec::LINE_DELIMITER;

use crate::application::{DeviceIngress, SerialChannel};
use crate::domain::SerialSettings;
use crate::infrastructure::ConnectionFailure;

/// Granularity of the reconnect wait, so shutdown is noticed promptly.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Longest device line the reader will buffer, terminator included.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Why [`read_device_lines`] returned without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    /// The shutdown flag was cleared.
    Shutdown,
    /// The stream reached end-of-file.
    EndOfStream,
}

/// Opens the serial port with 8N1 framing and no flow control.
///
/// # Errors
///
/// Returns [`ConnectionFailure::SerialOpen`] if the device does not exist, is
/// busy, or rejects the settings.
pub fn open_port(settings: &SerialSettings) -> Result<Box<dyn SerialPort>, ConnectionFailure> {
    serialport::new(&settings.path, settings.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(settings.read_timeout())
        .open()
        .map_err(|source| ConnectionFailure::SerialOpen {
            path: settings.path.clone(),
            source,
        })
}

/// Reads newline-terminated lines from `reader` and hands each one to
/// `ingress` until shutdown or end-of-file.
///
/// Timeouts are treated as "no data yet".  A trailing line without a
/// terminator is delivered at end-of-file.  A line that outgrows
/// [`MAX_LINE_BYTES`] is reported through [`DeviceIngress::on_oversized_line`]
/// and the rest of it is dropped.
///
/// # Errors
///
/// Returns any I/O error other than a timeout.
pub fn read_device_lines<R: BufRead>(
    mut reader: R,
    ingress: &DeviceIngress,
    running: &AtomicBool,
) -> io::Result<ReaderExit> {
    let mut line: Vec<u8> = Vec::with_capacity(256);
    // Set after an oversized line until its terminator has been consumed.
    let mut discarding = false;

    loop {
        if !running.load(Ordering::SeqCst) {
            if !line.is_empty() {
                debug!("discarding {} bytes of unterminated device line on shutdown", line.len());
            }
            return Ok(ReaderExit::Shutdown);
        }

        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                // Bytes read before the timeout are already in `line`.
                continue;
            }
            Err(e) => return Err(e),
        };

        if available.is_empty() {
            if !line.is_empty() {
                ingress.on_line(&line);
            }
            return Ok(ReaderExit::EndOfStream);
        }

        let (chunk, complete) = match available.iter().position(|&b| b == LINE_DELIMITER) {
            Some(end) => (&available[..=end], true),
            None => (available, false),
        };
        let consumed = chunk.len();

        if discarding {
            discarding = !complete;
        } else {
            let room = MAX_LINE_BYTES - line.len();
            if chunk.len() > room {
                line.extend_from_slice(&chunk[..room]);
                ingress.on_oversized_line(&line);
                line.clear();
                discarding = !complete;
            } else {
                line.extend_from_slice(chunk);
                if complete {
                    ingress.on_line(&line);
                    line.clear();
                }
            }
        }

        reader.consume(consumed);
    }
}

/// Runs one serial session: open, install the writer, read until the port is
/// lost or shutdown is requested.
///
/// The channel is cleared when this function returns, whatever the reason.
///
/// # Errors
///
/// Returns a [`ConnectionFailure`] if the port cannot be opened, a read
/// fails, or the device closes the stream.
pub fn run_serial_session(
    settings: &SerialSettings,
    channel: &Arc<SerialChannel>,
    ingress: &DeviceIngress,
    running: &AtomicBool,
) -> Result<(), ConnectionFailure> {
    let port = open_port(settings)?;
    let writer = port
        .try_clone()
        .map_err(|source| ConnectionFailure::SerialOpen {
            path: settings.path.clone(),
            source,
        })?;

    let _lease = channel.install(Box::new(writer));
    info!(
        "connected to serial port {} at {} baud",
        settings.path, settings.baud_rate
    );

    let outcome = read_device_lines(BufReader::new(port), ingress, running);
    match outcome {
        Ok(ReaderExit::Shutdown) => {
            info!("serial session on {} stopped", settings.path);
            Ok(())
        }
        Ok(ReaderExit::EndOfStream) => Err(ConnectionFailure::SerialClosed {
            path: settings.path.clone(),
        }),
        Err(source) => Err(ConnectionFailure::SerialRead {
            path: settings.path.clone(),
            source,
        }),
    }
}

/// Device Ingress Loop: runs serial sessions until shutdown.
///
/// With `reconnect_delay == None` the first failure ends the loop and is
/// returned.  Otherwise the port is reopened after the delay for as long as
/// the bridge is running.
///
/// # Errors
///
/// Returns the [`ConnectionFailure`] that ended the loop when reconnection is
/// disabled.
pub fn run_device_ingress(
    settings: &SerialSettings,
    channel: &Arc<SerialChannel>,
    ingress: &DeviceIngress,
    running: &AtomicBool,
    reconnect_delay: Option<Duration>,
) -> Result<(), ConnectionFailure> {
    loop {
        let failure = match run_serial_session(settings, channel, ingress, running) {
            Ok(()) => return Ok(()),
            Err(failure) => failure,
        };

        let Some(delay) = reconnect_delay else {
            return Err(failure);
        };
        warn!("{failure}; reopening in {}s", delay.as_secs_f32());
        if !sleep_while_running(delay, running) {
            return Ok(());
        }
    }
}

/// Sleeps for `delay` in short steps.  Returns `false` if shutdown was
/// requested in the meantime.
fn sleep_while_running(delay: Duration, running: &AtomicBool) -> bool {
    let deadline = Instant::now() + delay;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(SHUTDOWN_POLL.min(deadline - now));
    }
    false
}

// ── Tests ─────────────────────────────────────────────────────────────────────
