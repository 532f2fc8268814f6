//! Thread liveness
//!
//! A [`LivenessGuard`] is moved onto the observed thread. When that thread
//! returns or unwinds the guard drops, its channel disconnects and the
//! paired [`Liveness`] reports the thread gone. Works without joining, so a
//! watcher can observe threads it does not own.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// Held by the observed thread for its whole life
#[derive(Debug)]
pub struct LivenessGuard {
    _alive: Sender<()>,
}

/// Observer side
#[derive(Debug, Clone)]
pub struct Liveness {
    name: String,
    rx: Receiver<()>,
}

/// Create a guard/observer pair for a thread called `name`
pub fn liveness(name: impl Into<String>) -> (LivenessGuard, Liveness) {
    let (tx, rx) = bounded(0);
    (
        LivenessGuard { _alive: tx },
        Liveness {
            name: name.into(),
            rx,
        },
    )
}

impl Liveness {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alive(&self) -> bool {
        !matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Wait up to `timeout` for the thread to exit. Returns true once gone.
    pub fn wait_exit(&self, timeout: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }
}
