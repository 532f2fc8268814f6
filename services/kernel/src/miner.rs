//! Miner
//!
//! A miner hosts a shard of devices on their own threads. It relays device
//! state reports to the kernel, fans kernel signals out to its devices and
//! runs a watcher that reports `MayEnd` once every hosted device thread has
//! exited.

use crate::device::{Device, HostedDevice};
use crossbeam_channel::{unbounded, Sender};
use netsim_actors::{
    join_or_detach, liveness, run_actor, spawn_named, ActorBehavior, Flow, Liveness, StateHandler,
    Watcher, WatcherHandle,
};
use netsim_config::SimulationConfig;
use netsim_types::{
    exit_code, ActorKind, ActorState, EndReason, Message, Request, RespondPayload, Result, Signal,
    SignalKind, SimError,
};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// A miner before start: a label and the devices placed on it
pub struct Miner {
    label: String,
    devices: Vec<Device>,
}

impl Miner {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            devices: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of hosted devices
    pub fn load(&self) -> usize {
        self.devices.len()
    }

    pub fn host(&mut self, device: Device) {
        self.devices.push(device);
    }

    pub fn device_labels(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.label().to_string()).collect()
    }

    /// Spawn the miner thread; it starts its devices from there
    pub fn start(self, kernel: Sender<Message>, config: &SimulationConfig) -> Result<RunningMiner> {
        let (inbound_tx, inbound_rx) = unbounded();
        let mut actor = MinerActor {
            state: StateHandler::new(ActorKind::Miner, self.label.clone())
                .with_report_target(kernel.clone()),
            label: self.label.clone(),
            kernel,
            inbound: inbound_tx.clone(),
            pending: self.devices,
            hosted: Vec::new(),
            watcher: None,
            watcher_interval: config.timing.watcher_interval(),
            join_timeout: config.timing.join_timeout(),
        };

        let poll = config.timing.poll();
        let (guard, alive) = liveness(self.label.clone());
        let handle = spawn_named(self.label.clone(), move || {
            let _guard = guard;
            run_actor(&mut actor, &inbound_rx, poll);
        })?;

        Ok(RunningMiner {
            label: self.label,
            inbound: inbound_tx,
            liveness: alive,
            handle: Some(handle),
        })
    }
}

/// Controller-side handle of a started miner
#[derive(Debug)]
pub struct RunningMiner {
    label: String,
    inbound: Sender<Message>,
    liveness: Liveness,
    handle: Option<JoinHandle<()>>,
}

impl RunningMiner {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub fn signal(&self, kind: SignalKind) -> Result<()> {
        Signal::send(ActorKind::Kernel, kind, &self.inbound)
    }

    /// Join the miner thread. False if it was detached.
    pub fn join(&mut self, timeout: Duration) -> bool {
        match self.handle.take() {
            Some(handle) => join_or_detach(handle, &self.liveness, timeout),
            None => true,
        }
    }
}

struct MinerActor {
    label: String,
    state: StateHandler,
    kernel: Sender<Message>,
    inbound: Sender<Message>,
    pending: Vec<Device>,
    hosted: Vec<HostedDevice>,
    watcher: Option<WatcherHandle>,
    watcher_interval: Duration,
    join_timeout: Duration,
}

impl MinerActor {
    fn fan_out(&self, kind: SignalKind) {
        for device in self.hosted.iter().filter(|d| d.liveness.is_alive()) {
            if Signal::send(ActorKind::Miner, kind.clone(), &device.inbound).is_err() {
                trace!(miner = %self.label, device = %device.label, "Device already gone");
            }
        }
    }
}

impl ActorBehavior for MinerActor {
    fn kind(&self) -> ActorKind {
        ActorKind::Miner
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn on_start(&mut self) -> Result<()> {
        self.state.change_state(ActorState::Running);
        for device in std::mem::take(&mut self.pending) {
            let hosted = device.spawn(self.inbound.clone())?;
            debug!(miner = %self.label, device = %hosted.label, "Device spawned");
            self.hosted.push(hosted);
        }

        let devices: Vec<Liveness> = self.hosted.iter().map(|d| d.liveness.clone()).collect();
        let queue = self.inbound.clone();
        let label = self.label.clone();
        let watcher = Watcher::spawn(
            self.label.clone(),
            self.watcher_interval,
            move || devices.iter().all(|device| !device.is_alive()),
            move || {
                let signal = SignalKind::MayEnd { label: label.clone() };
                if Signal::send(ActorKind::Miner, signal, &queue).is_err() {
                    trace!(miner = %label, "Miner gone before watcher fired");
                }
            },
        )?;
        self.watcher = Some(watcher);
        info!(miner = %self.label, devices = self.hosted.len(), "Miner started");
        Ok(())
    }

    fn handle_signal(&mut self, signal: Signal) -> Result<Flow> {
        match signal.into_kind() {
            report @ SignalKind::StateReport {
                actor: ActorKind::Device,
                ..
            } => {
                Signal::send(ActorKind::Miner, report, &self.kernel)?;
            }
            SignalKind::StateReport { actor, label, state } => {
                trace!(
                    miner = %self.label,
                    actor = ?actor,
                    label = %label,
                    state = %state,
                    "State report"
                );
            }
            SignalKind::FlushRouteData => self.fan_out(SignalKind::FlushRouteData),
            SignalKind::EndDevice { reason } => self.fan_out(SignalKind::EndDevice { reason }),
            SignalKind::Terminate => self.fan_out(SignalKind::EndDevice {
                reason: EndReason::Shutdown,
            }),
            SignalKind::MayEnd { .. } => {
                self.state.change_state(ActorState::MayEnd);
                Signal::send(
                    ActorKind::Miner,
                    SignalKind::MayEnd {
                        label: self.label.clone(),
                    },
                    &self.kernel,
                )?;
                return Ok(Flow::Stop);
            }
            other => return Err(SimError::unexpected(ActorKind::Miner, other.name())),
        }
        Ok(Flow::Continue)
    }

    fn handle_request(&mut self, request: Request) -> Result<Flow> {
        let name = request.body.name();
        request.respond(ActorKind::Miner, exit_code::REJECTED, RespondPayload::Empty)?;
        Err(SimError::unexpected(ActorKind::Miner, name))
    }

    fn on_stop(&mut self) {
        // Only reached early if the queue closed; make sure devices end
        self.fan_out(SignalKind::EndDevice {
            reason: EndReason::Shutdown,
        });
        for device in &mut self.hosted {
            if let Some(handle) = device.handle.take() {
                if !join_or_detach(handle, &device.liveness, self.join_timeout) {
                    warn!(miner = %self.label, device = %device.label, "Device thread detached");
                }
            }
        }
        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
        self.state.change_state(ActorState::Stopped);
    }
}
