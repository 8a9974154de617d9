//! Process-wide stop request.
//!
//! The two loops wait in different ways: the serial thread blocks in short
//! reads and checks a flag between them, while the broker task is parked in
//! `EventLoop::poll` and has to be woken.  [`Shutdown`] carries both forms of
//! the same request so neither loop needs a polling timeout around work that
//! must not be interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable stop request shared by `main` and both loops.
#[derive(Clone)]
pub struct Shutdown {
    running: Arc<AtomicBool>,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            running: Arc::new(AtomicBool::new(true)),
            stop_tx: Arc::new(stop_tx),
        }
    }

    /// Requests shutdown.  Idempotent.
    pub fn trigger(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_tx.send_replace(true);
    }

    /// `true` until [`trigger`](Self::trigger) is called.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The flag form, for blocking code.
    pub fn flag(&self) -> &AtomicBool {
        &self.running
    }

    /// Resolves once shutdown has been requested; immediately if it already
    /// was.  Cancel-safe.
    pub async fn stopped(&self) {
        let mut stop_rx = self.stop_tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = stop_rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
