//! Traffic Listener
//!
//! Mirrors inbound traffic of one device to an observer queue. In interrupt
//! mode the socket blocks on each packet until the observer decides to
//! release or drop it, bounded by a timeout after which it is released.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use netsim_actors::{Module, ModuleState};
use netsim_types::{Packet, PortRef};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

pub const MODULE_NAME: &str = "listener";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerDecision {
    Release,
    Drop,
}

/// One observed packet
#[derive(Debug)]
pub struct Observation {
    pub device: String,
    pub port: PortRef,
    pub packet: Packet,
    decision: Option<Sender<ListenerDecision>>,
}

impl Observation {
    /// Whether the socket is blocked waiting for a decision
    pub fn is_interrupting(&self) -> bool {
        self.decision.is_some()
    }

    pub fn decide(self, decision: ListenerDecision) {
        if let Some(tx) = self.decision {
            let _ = tx.send(decision);
        }
    }
}

/// Pump-side tap, cloned into each inbound pump
#[derive(Debug, Clone)]
pub struct TrafficListener {
    tx: Sender<Observation>,
    interrupt: bool,
    timeout: Duration,
    state: Arc<RwLock<ModuleState>>,
}

impl TrafficListener {
    pub fn new(interrupt: bool, timeout: Duration) -> (Self, Receiver<Observation>) {
        let (tx, rx) = unbounded();
        (
            Self {
                tx,
                interrupt,
                timeout,
                state: Arc::new(RwLock::new(ModuleState::Enabled)),
            },
            rx,
        )
    }

    /// Module handle sharing this listener's state
    pub fn module(&self) -> ListenerModule {
        ListenerModule {
            state: self.state.clone(),
        }
    }

    /// Mirror `packet` and, in interrupt mode, wait for the verdict
    pub fn observe(&self, device: &str, port: PortRef, packet: &Packet) -> ListenerDecision {
        if *self.state.read() != ModuleState::Enabled {
            return ListenerDecision::Release;
        }

        let (decision, verdict) = if self.interrupt {
            let (tx, rx) = bounded(1);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let observation = Observation {
            device: device.to_string(),
            port,
            packet: packet.clone(),
            decision,
        };
        if self.tx.send(observation).is_err() {
            trace!(device, "Listener queue closed");
            return ListenerDecision::Release;
        }

        match verdict {
            Some(rx) => match rx.recv_timeout(self.timeout) {
                Ok(decision) => decision,
                Err(_) => {
                    debug!(
                        device,
                        packet_id = %packet.id,
                        "Listener decision timed out, releasing"
                    );
                    ListenerDecision::Release
                }
            },
            None => ListenerDecision::Release,
        }
    }
}

/// Registry-side handle
#[derive(Debug)]
pub struct ListenerModule {
    state: Arc<RwLock<ModuleState>>,
}

impl ListenerModule {
    fn set(&mut self, state: ModuleState) -> bool {
        std::mem::replace(&mut *self.state.write(), state) != state
    }
}

impl Module for ListenerModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn state(&self) -> ModuleState {
        *self.state.read()
    }

    fn enable(&mut self) -> bool {
        self.set(ModuleState::Enabled)
    }

    fn disable(&mut self) -> bool {
        self.set(ModuleState::Disabled)
    }

    fn pause(&mut self) -> bool {
        self.set(ModuleState::Paused)
    }
}
