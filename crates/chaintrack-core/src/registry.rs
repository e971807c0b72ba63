//! Registry entry types.
//!
//! The subscriber set and the tracking handle for an address live in the
//! same map entry, so one cannot outlive the other.

use std::collections::BTreeSet;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Cancellation capability for one address's relay task.
pub struct TrackingHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TrackingHandle {
    pub fn new(cancel: watch::Sender<bool>, task: JoinHandle<()>) -> Self {
        Self { cancel, task }
    }

    /// Signal the relay task to stop at its next suspension point.
    /// Idempotent; a send to an already-exited task is a no-op.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Wait for the relay task to exit.
    pub async fn wait(self) {
        let _ = self.task.await;
    }
}

/// All interest in one address: the subscribers and the running relay task.
pub struct TrackedWallet {
    /// Subscriber IDs, ascending. Non-empty for as long as the entry exists.
    pub chat_ids: BTreeSet<i64>,
    pub handle: TrackingHandle,
}
