//! Actor System
//!
//! Generic message loop shared by every actor: dequeue one message from the
//! inbound queue, branch on Signal vs Request, hand it to the behavior and
//! let the behavior's supervision directive decide what happens on error.
//! Actors run on dedicated OS threads; the loop blocks on a crossbeam
//! receive with an idle timeout so behaviors get periodic `on_idle` ticks.

use crate::liveness::Liveness;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use netsim_types::{ActorKind, Message, Request, Result, Signal, SimError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// What the loop does after a message was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Supervision directive for error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorDirective {
    /// Log and keep processing
    Resume,
    /// Leave the loop
    Stop,
}

/// Behavior plugged into [`run_actor`]
pub trait ActorBehavior: Send {
    fn kind(&self) -> ActorKind;

    fn label(&self) -> &str;

    /// Called once before the first message
    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    fn handle_signal(&mut self, signal: Signal) -> Result<Flow>;

    fn handle_request(&mut self, request: Request) -> Result<Flow>;

    /// Called whenever the inbound queue stayed empty for the idle period
    fn on_idle(&mut self) -> Result<Flow> {
        Ok(Flow::Continue)
    }

    /// Called once after the loop exits, whatever the reason
    fn on_stop(&mut self) {}

    /// Handle failure - return supervision directive
    fn on_error(&mut self, error: &SimError) -> SupervisorDirective {
        if error.is_protocol_failure() {
            debug!(actor = ?self.kind(), label = %self.label(), error = %error, "Protocol failure");
        } else {
            error!(actor = ?self.kind(), label = %self.label(), error = %error, "Actor error");
        }
        SupervisorDirective::Resume
    }
}

/// Counters collected by one run of the loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActorStats {
    pub messages_handled: u64,
    pub errors: u64,
    pub processing_time: Duration,
    pub runtime: Duration,
}

/// Drive `actor` until it asks to stop or its inbound queue disconnects
pub fn run_actor<A: ActorBehavior + ?Sized>(
    actor: &mut A,
    inbound: &Receiver<Message>,
    idle: Duration,
) -> ActorStats {
    let started = Instant::now();
    let mut stats = ActorStats::default();

    if let Err(e) = actor.on_start() {
        error!(
            actor = ?actor.kind(),
            label = %actor.label(),
            error = %e,
            "Actor failed to start"
        );
        actor.on_stop();
        stats.runtime = started.elapsed();
        return stats;
    }
    debug!(actor = ?actor.kind(), label = %actor.label(), "Actor entering message loop");

    loop {
        let outcome = match inbound.recv_timeout(idle) {
            Ok(message) => {
                let handled_at = Instant::now();
                let outcome = match message {
                    Message::Signal(signal) => actor.handle_signal(signal),
                    Message::Request(request) => actor.handle_request(request),
                };
                stats.messages_handled += 1;
                stats.processing_time += handled_at.elapsed();
                outcome
            }
            Err(RecvTimeoutError::Timeout) => actor.on_idle(),
            Err(RecvTimeoutError::Disconnected) => {
                debug!(actor = ?actor.kind(), label = %actor.label(), "Inbound queue closed");
                break;
            }
        };

        match outcome {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => break,
            Err(e) => {
                stats.errors += 1;
                if actor.on_error(&e) == SupervisorDirective::Stop {
                    warn!(
                        actor = ?actor.kind(),
                        label = %actor.label(),
                        error = %e,
                        "Actor stopping after error"
                    );
                    break;
                }
            }
        }
    }

    actor.on_stop();
    stats.runtime = started.elapsed();
    info!(
        actor = ?actor.kind(),
        label = %actor.label(),
        messages = stats.messages_handled,
        errors = stats.errors,
        runtime_ms = stats.runtime.as_millis() as u64,
        "Actor stopped"
    );
    stats
}

/// Spawn a named OS thread, mapping spawn failure into `SimError::Spawn`
pub fn spawn_named<F, T>(name: impl Into<String>, f: F) -> Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let name = name.into();
    std::thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|source| SimError::Spawn { name, source })
}

/// Wait up to `timeout` for the observed thread to exit and join it. A
/// thread still running after that is detached. Returns whether it exited.
pub fn join_or_detach<T>(handle: JoinHandle<T>, liveness: &Liveness, timeout: Duration) -> bool {
    if liveness.wait_exit(timeout) {
        if handle.join().is_err() {
            warn!(thread = %liveness.name(), "Thread exited by panicking");
        }
        true
    } else {
        warn!(
            thread = %liveness.name(),
            timeout_ms = timeout.as_millis() as u64,
            "Thread ignored cancellation, detaching"
        );
        drop(handle);
        false
    }
}
