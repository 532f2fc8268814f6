//! Quiescence Watcher
//!
//! Polls a check at a fixed interval on its own thread. The first time the
//! check reports quiescence the watcher fires its callback once and exits.
//! Device, miner and kernel tiers each run one.

use crate::cancel::CancelToken;
use crate::system::spawn_named;
use netsim_types::Result;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace};

/// Handle to a running watcher
#[derive(Debug)]
pub struct WatcherHandle {
    name: String,
    stop: CancelToken,
    handle: Option<JoinHandle<bool>>,
}

pub struct Watcher;

impl Watcher {
    /// Spawn a watcher thread. `check` returns true when everything watched
    /// is quiescent; `on_quiescent` runs at most once.
    pub fn spawn<P, F>(
        name: impl Into<String>,
        interval: Duration,
        mut check: P,
        on_quiescent: F,
    ) -> Result<WatcherHandle>
    where
        P: FnMut() -> bool + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let stop = CancelToken::new();
        let thread_stop = stop.clone();
        let thread_name = name.clone();

        let handle = spawn_named(format!("watch-{}", name), move || {
            loop {
                if thread_stop.is_cancelled() {
                    trace!(watcher = %thread_name, "Watcher stopped");
                    return false;
                }
                if check() {
                    debug!(watcher = %thread_name, "Quiescence detected");
                    on_quiescent();
                    return true;
                }
                if !thread_stop.sleep(interval) {
                    return false;
                }
            }
        })?;

        Ok(WatcherHandle {
            name,
            stop,
            handle: Some(handle),
        })
    }
}

impl WatcherHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop polling and join. Returns whether quiescence had fired.
    pub fn stop(mut self) -> bool {
        self.stop.cancel();
        self.join_inner()
    }

    fn join_inner(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or(false),
            None => false,
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop.cancel();
        self.join_inner();
    }
}
