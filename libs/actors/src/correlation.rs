//! Correlation Waiter
//!
//! Tracks the requests an actor has outstanding and matches responses
//! arriving on its respond queue by correlation id. Responses that arrive
//! while the actor waits for a different id are parked in an old-responses
//! buffer for a grace period so a later wait can still claim them.

use crate::cancel::CancelToken;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use netsim_types::{ActorKind, CorrelationId, Request, RequestBody, Respond};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Longest single blocking receive while waiting, so cancellation is seen
const WAIT_SLICE: Duration = Duration::from_millis(25);

/// Per-actor request/respond bookkeeping
#[derive(Debug)]
pub struct Correlator {
    respond_tx: Sender<Respond>,
    respond_rx: Receiver<Respond>,
    active: HashMap<CorrelationId, Instant>,
    old: HashMap<CorrelationId, (Respond, Instant)>,
    timeout: Duration,
    grace: Duration,
}

impl Correlator {
    /// `timeout` bounds how long an issued request stays outstanding;
    /// `grace` bounds how long a parked response is kept.
    pub fn new(timeout: Duration, grace: Duration) -> Self {
        let (respond_tx, respond_rx) = unbounded();
        Self {
            respond_tx,
            respond_rx,
            active: HashMap::new(),
            old: HashMap::new(),
            timeout,
            grace,
        }
    }

    /// Build a request that wants a response and register its id
    pub fn issue(&mut self, asker: ActorKind, target: ActorKind, body: RequestBody) -> Request {
        let request = Request::with_response(asker, target, body, &self.respond_tx);
        if let Some(id) = request.correlation_id() {
            self.register(id);
        }
        request
    }

    /// Track an id issued elsewhere on this correlator's queue
    pub fn register(&mut self, id: CorrelationId) {
        self.active.insert(id, Instant::now() + self.timeout);
    }

    pub fn is_outstanding(&self, id: &CorrelationId) -> bool {
        self.active.contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn parked_count(&self) -> usize {
        self.old.len()
    }

    /// Sender half, handed to request targets as the reply address
    pub fn respond_queue(&self) -> &Sender<Respond> {
        &self.respond_tx
    }

    /// Receiver half, for actors that `select!` over it directly
    pub fn respond_receiver(&self) -> &Receiver<Respond> {
        &self.respond_rx
    }

    /// Block until the response for `id` arrives, `timeout` elapses or
    /// `cancel` is tripped. Unmatched responses are parked.
    pub fn wait_for(
        &mut self,
        id: CorrelationId,
        timeout: Duration,
        cancel: Option<&CancelToken>,
    ) -> Option<Respond> {
        if let Some((respond, _)) = self.old.remove(&id) {
            self.active.remove(&id);
            return Some(respond);
        }

        let deadline = Instant::now() + timeout;
        loop {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                trace!(correlation_id = %id, "Wait cancelled");
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(
                    correlation_id = %id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Response timed out"
                );
                break;
            }

            match self.respond_rx.recv_timeout((deadline - now).min(WAIT_SLICE)) {
                Ok(respond) if respond.correlation_id == id => {
                    self.active.remove(&id);
                    return Some(respond);
                }
                Ok(respond) => self.park(respond),
                Err(RecvTimeoutError::Timeout) => continue,
                // We hold a sender, so this only happens on teardown races
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.active.remove(&id);
        self.sweep();
        None
    }

    /// Match a response received outside `wait_for` (from a `select!`).
    /// Returns it if it answers an outstanding request; stale or unknown
    /// responses are discarded.
    pub fn accept(&mut self, respond: Respond) -> Option<Respond> {
        if self.active.remove(&respond.correlation_id).is_some() {
            Some(respond)
        } else {
            trace!(correlation_id = %respond.correlation_id, "Discarding unsolicited response");
            None
        }
    }

    /// Drop expired requests and stale parked responses
    pub fn sweep(&mut self) {
        let now = Instant::now();
        let before = self.active.len() + self.old.len();
        self.active.retain(|_, expiry| *expiry > now);
        self.old.retain(|_, (_, parked)| now.duration_since(*parked) < self.grace);
        let swept = before - self.active.len() - self.old.len();
        if swept > 0 {
            trace!(swept, "Swept stale correlation entries");
        }
    }

    fn park(&mut self, respond: Respond) {
        if self.active.contains_key(&respond.correlation_id) {
            self.old
                .insert(respond.correlation_id, (respond, Instant::now()));
        } else {
            trace!(
                correlation_id = %respond.correlation_id,
                "Dropping response for unknown request"
            );
        }
    }
}
