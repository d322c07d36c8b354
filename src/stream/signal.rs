use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

/// One-shot cooperative cancellation shared by the session's worker threads.
///
/// Cancelling drops the only sender, which disconnects every receiver at once,
/// so a worker parked in [`StopSignal::sleep`] wakes immediately.
#[derive(Clone)]
pub struct StopSignal {
    sender: Arc<Mutex<Option<Sender<()>>>>,
    receiver: Receiver<()>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(0);
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver,
        }
    }

    pub fn cancel(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        drop(sender);
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleeps for `duration` unless cancelled first. Returns true if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        match self.receiver.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => false,
            // Nothing is ever sent, so any other outcome means disconnected.
            _ => true,
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
