//! The shared serial channel handle.
//!
//! The serial port is the only resource touched from both directions of the
//! bridge:
//!
//! - the **device side** opens the port, reads from it, and *owns* the
//!   writable clone for as long as the connection lasts;
//! - the **bus side** borrows that clone to write commands.
//!
//! [`SerialChannel`] is the slot the owner puts the writer into.  The slot is
//! guarded by a mutex, so the bus side either sees a fully installed writer or
//! no writer at all, never one that is being swapped out or dropped.  While
//! the slot is empty, writes fail fast with [`ChannelError::Unavailable`];
//! nothing is queued for later.
//!
//! # Lifecycle
//!
//! ```text
//! open port ──► install(writer) ──► ChannelLease ──► drop(lease)
//!                  slot = Some           │              slot = None
//!                                        │              (writer flushed)
//!                     write_line() ──────┘
//! ```
//!
//! Each install bumps a generation counter.  A lease only clears the slot if
//! the slot still holds *its* writer, so a stale lease from a previous
//! connection can never remove the writer of the current one.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, warn};

/// The writable half of the serial connection.
pub type ChannelWriter = Box<dyn Write + Send>;

/// Why a write to the channel did not reach the device.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// No serial connection is open.
    #[error("serial channel is not open")]
    Unavailable,

    /// The port rejected the write.
    #[error("serial write failed: {0}")]
    Write(#[from] io::Error),
}

#[derive(Default)]
struct Slot {
    generation: u64,
    writer: Option<ChannelWriter>,
}

/// Synchronized slot holding the current serial writer, if any.
///
/// Constructed once at startup and shared (`Arc`) between the device session
/// and the bus handler.
#[derive(Default)]
pub struct SerialChannel {
    slot: Mutex<Slot>,
}

impl SerialChannel {
    /// Creates an empty channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `writer` as the current connection and returns the lease that
    /// keeps it installed.
    ///
    /// If a writer is already installed it is flushed and replaced.
    pub fn install(self: &Arc<Self>, writer: ChannelWriter) -> ChannelLease {
        let mut slot = self.lock();
        if let Some(previous) = slot.writer.take() {
            warn!("serial channel replaced while a previous connection was still installed");
            flush_and_drop(previous);
        }
        slot.generation = slot.generation.wrapping_add(1);
        slot.writer = Some(writer);
        debug!("serial channel installed (generation {})", slot.generation);

        ChannelLease {
            channel: Arc::clone(self),
            generation: slot.generation,
        }
    }

    /// Returns `true` if a writer is currently installed.
    pub fn is_open(&self) -> bool {
        self.lock().writer.is_some()
    }

    /// Writes one complete line and flushes it to the device.
    ///
    /// The slot stays locked for the duration of the write, so a concurrent
    /// release waits for the in-flight line instead of cutting it short.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Unavailable`] if no writer is installed, or
    /// [`ChannelError::Write`] if the port reports an I/O error.
    pub fn write_line(&self, line: &[u8]) -> Result<(), ChannelError> {
        let mut slot = self.lock();
        let writer = slot.writer.as_mut().ok_or(ChannelError::Unavailable)?;
        writer.write_all(line)?;
        writer.flush()?;
        Ok(())
    }

    fn release(&self, generation: u64) {
        let mut slot = self.lock();
        if slot.generation != generation {
            // A newer connection has already taken the slot.
            return;
        }
        if let Some(writer) = slot.writer.take() {
            flush_and_drop(writer);
            debug!("serial channel released (generation {generation})");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // The slot only holds an `Option`; a panic elsewhere while it was
        // locked cannot leave it half-updated.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a writer installed in a [`SerialChannel`]; dropping it flushes and
/// removes the writer.
#[must_use = "the writer is removed as soon as the lease is dropped"]
pub struct ChannelLease {
    channel: Arc<SerialChannel>,
    generation: u64,
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        self.channel.release(self.generation);
    }
}

fn flush_and_drop(mut writer: ChannelWriter) {
    if let Err(e) = writer.flush() {
        warn!("failed to flush serial writer on release: {e}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// In-memory writer whose bytes stay observable after the boxed writer is
    /// moved into the channel.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_new_channel_is_closed() {
        assert!(!SerialChannel::new().is_open());
    }

    #[test]
    fn test_write_without_writer_is_unavailable() {
        let channel = SerialChannel::new();
        let result = channel.write_line(b"{\"id\":1}\n");
        assert!(matches!(result, Err(ChannelError::Unavailable)));
    }

    #[test]
    fn test_write_reaches_installed_writer() {
        // Arrange
        let channel = Arc::new(SerialChannel::new());
        let buf = SharedBuf::default();
        let _lease = channel.install(Box::new(buf.clone()));

        // Act
        channel.write_line(b"{\"value\":10,\"id\":3}\n").unwrap();

        // Assert
        assert!(channel.is_open());
        assert_eq!(buf.contents(), b"{\"value\":10,\"id\":3}\n");
    }

    #[test]
    fn test_dropping_lease_closes_channel() {
        let channel = Arc::new(SerialChannel::new());
        let lease = channel.install(Box::new(SharedBuf::default()));
        drop(lease);
        assert!(!channel.is_open());
        assert!(matches!(
            channel.write_line(b"x\n"),
            Err(ChannelError::Unavailable)
        ));
    }

    #[test]
    fn test_stale_lease_does_not_remove_newer_writer() {
        // Arrange: connection A is replaced by connection B before A's owner
        // gets around to dropping its lease.
        let channel = Arc::new(SerialChannel::new());
        let first = SharedBuf::default();
        let second = SharedBuf::default();
        let lease_a = channel.install(Box::new(first.clone()));
        let _lease_b = channel.install(Box::new(second.clone()));

        // Act
        drop(lease_a);
        channel.write_line(b"after\n").unwrap();

        // Assert
        assert!(channel.is_open());
        assert!(first.contents().is_empty());
        assert_eq!(second.contents(), b"after\n");
    }

    #[test]
    fn test_io_error_is_reported_and_writer_kept() {
        let channel = Arc::new(SerialChannel::new());
        let _lease = channel.install(Box::new(FailingWriter));
        let result = channel.write_line(b"x\n");
        assert!(matches!(result, Err(ChannelError::Write(_))));
        // The owner decides when the connection is gone, not the writer.
        assert!(channel.is_open());
    }

    #[test]
    fn test_concurrent_writes_never_interleave_lines() {
        // Arrange
        let channel = Arc::new(SerialChannel::new());
        let buf = SharedBuf::default();
        let _lease = channel.install(Box::new(buf.clone()));

        // Act: four threads each write 50 distinct lines.
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let channel = Arc::clone(&channel);
                thread::spawn(move || {
                    for i in 0..50 {
                        let line = format!("{{\"t\":{t},\"i\":{i}}}\n");
                        channel.write_line(line.as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Assert: every line is intact.
        let text = String::from_utf8(buf.contents()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 200);
        for line in lines {
            assert!(line.starts_with("{\"t\":") && line.ends_with('}'), "torn line {line}");
        }
    }

    #[test]
    fn test_install_and_release_race_with_writers() {
        // Writers running while the owner repeatedly reconnects must only ever
        // see Ok or Unavailable, never a panic.
        let channel = Arc::new(SerialChannel::new());
        let writer = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                for _ in 0..500 {
                    match channel.write_line(b"{\"id\":1}\n") {
                        Ok(()) | Err(ChannelError::Unavailable) => {}
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            })
        };
        for _ in 0..100 {
            let lease = channel.install(Box::new(SharedBuf::default()));
            drop(lease);
        }
        writer.join().unwrap();
        assert!(!channel.is_open());
    }
}
