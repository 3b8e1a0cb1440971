//! Single-slot "fetch more" signal between a playback consumer and the
//! download loop.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Consumer side of the pacing channel.
///
/// Holds at most one pending signal: a burst of requests while the loop is
/// busy collapses into a single wakeup.
#[derive(Debug, Clone)]
pub struct PacingChannel {
    tx: mpsc::Sender<()>,
}

/// Download-loop side of the pacing channel.
#[derive(Debug)]
pub struct PacingReceiver {
    rx: mpsc::Receiver<()>,
}

impl PacingChannel {
    pub fn new() -> (Self, PacingReceiver) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, PacingReceiver { rx })
    }

    /// Push up to `count` signals without blocking. Returns how many were
    /// actually queued (0 or 1).
    pub fn request(&self, count: usize) -> usize {
        let mut queued = 0;
        for _ in 0..count {
            match self.tx.try_send(()) {
                Ok(()) => queued += 1,
                Err(TrySendError::Full(())) | Err(TrySendError::Closed(())) => break,
            }
        }
        queued
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PacingReceiver {
    /// Wait for the next signal. `false` once every sender is gone.
    pub async fn wait(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}
