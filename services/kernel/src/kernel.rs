//! Simulation Kernel
//!
//! Root of the actor tree. The kernel answers route queries from its
//! topology, proxies backend calls, keeps the topology in sync with
//! heartbeat connection changes and drives termination:
//!
//! 1. devices with applications end on their own and report `Stopped`
//! 2. once all of them have, the remaining devices are told to shut down
//! 3. a watcher over the miner threads emits `EndSimulation`
//!
//! After the loop exits the result sink is drained into a
//! [`SimulationResult`].

use crate::backend::Backend;
use crate::controller::MinerController;
use crate::topology::Topology;
use crossbeam_channel::{Receiver, Sender};
use netsim_actors::{run_actor, ActorBehavior, Flow, StateHandler, Watcher, WatcherHandle};
use netsim_config::SimulationConfig;
use netsim_types::{
    exit_code, ActorKind, ActorState, ConnectionChange, EndReason, LinkChange, Message, Request,
    RequestBody, RespondPayload, Result, ResultRecord, Signal, SignalKind, SimError,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Aggregated outcome of one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationResult {
    /// device → result channel → dumped payloads, in dump order
    pub records: BTreeMap<String, BTreeMap<String, Vec<Value>>>,
    /// Last reported state per device
    pub device_states: BTreeMap<String, ActorState>,
    pub timed_out: bool,
    pub elapsed_ms: u64,
    pub route_queries: u64,
}

impl SimulationResult {
    /// Payloads dumped by `device` under `channel`
    pub fn channel(&self, device: &str, channel: &str) -> &[Value] {
        self.records
            .get(device)
            .and_then(|channels| channels.get(channel))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn collect(&mut self, records: impl Iterator<Item = ResultRecord>) {
        for record in records {
            self.records
                .entry(record.device)
                .or_default()
                .entry(record.channel)
                .or_default()
                .push(record.payload);
        }
    }
}

/// Everything the kernel needs, assembled by the builder
pub struct KernelParts {
    pub config: SimulationConfig,
    pub topology: Topology,
    pub backend: Box<dyn Backend>,
    pub controller: MinerController,
    /// Devices that end on their own
    pub active_devices: BTreeSet<String>,
    pub inbound: (Sender<Message>, Receiver<Message>),
    pub records: Receiver<ResultRecord>,
}

pub struct Kernel {
    core: KernelCore,
    inbound: Receiver<Message>,
    records: Receiver<ResultRecord>,
}

impl Kernel {
    pub fn new(parts: KernelParts) -> Self {
        let (tx, rx) = parts.inbound;
        Self {
            core: KernelCore {
                state: StateHandler::new(ActorKind::Kernel, "kernel"),
                topology: parts.topology,
                backend: parts.backend,
                controller: parts.controller,
                active_devices: parts.active_devices,
                device_states: BTreeMap::new(),
                inbound: tx,
                watcher: None,
                shutdown_sent: false,
                timed_out: false,
                started: Instant::now(),
                route_queries: 0,
                start_error: None,
                config: parts.config,
            },
            inbound: rx,
            records: parts.records,
        }
    }

    /// Queue the kernel listens on
    pub fn inbound(&self) -> Sender<Message> {
        self.core.inbound.clone()
    }

    /// Run the simulation on the calling thread until `EndSimulation`
    pub fn run(mut self) -> Result<SimulationResult> {
        let poll = self.core.config.timing.poll();
        let stats = run_actor(&mut self.core, &self.inbound, poll);
        if let Some(message) = self.core.start_error.take() {
            return Err(SimError::configuration(
                format!("kernel failed to start: {}", message),
                None,
            ));
        }

        let mut result = SimulationResult {
            device_states: std::mem::take(&mut self.core.device_states),
            timed_out: self.core.timed_out,
            elapsed_ms: self.core.started.elapsed().as_millis() as u64,
            route_queries: self.core.route_queries,
            ..SimulationResult::default()
        };
        result.collect(self.records.try_iter());
        info!(
            devices = result.device_states.len(),
            records = result.records.values().map(BTreeMap::len).sum::<usize>(),
            messages = stats.messages_handled,
            timed_out = result.timed_out,
            elapsed_ms = result.elapsed_ms,
            "Simulation finished"
        );
        Ok(result)
    }
}

struct KernelCore {
    config: SimulationConfig,
    state: StateHandler,
    topology: Topology,
    backend: Box<dyn Backend>,
    controller: MinerController,
    active_devices: BTreeSet<String>,
    device_states: BTreeMap<String, ActorState>,
    inbound: Sender<Message>,
    watcher: Option<WatcherHandle>,
    shutdown_sent: bool,
    timed_out: bool,
    started: Instant,
    route_queries: u64,
    start_error: Option<String>,
}

impl KernelCore {
    fn start(&mut self) -> Result<()> {
        self.started = Instant::now();
        self.state.change_state(ActorState::Running);
        self.controller.start_all(self.inbound.clone(), &self.config)?;

        let miners = self.controller.liveness();
        let queue = self.inbound.clone();
        let watcher = Watcher::spawn(
            "kernel",
            self.config.timing.watcher_interval(),
            move || miners.iter().all(|miner| !miner.is_alive()),
            move || {
                if Signal::send(ActorKind::Kernel, SignalKind::EndSimulation, &queue).is_err() {
                    trace!("Kernel gone before watcher fired");
                }
            },
        )?;
        self.watcher = Some(watcher);

        if self.active_devices.is_empty() {
            self.shutdown_remaining("no device has applications");
        }
        info!(
            miners = self.controller.miner_count(),
            active_devices = self.active_devices.len(),
            "Simulation started"
        );
        Ok(())
    }

    /// Tell every miner to end the devices that are still up
    fn shutdown_remaining(&mut self, why: &str) {
        if self.shutdown_sent {
            return;
        }
        self.shutdown_sent = true;
        let reached = self.controller.broadcast(SignalKind::EndDevice {
            reason: EndReason::Shutdown,
        });
        info!(reason = why, miners = reached, "Shutting down remaining devices");
    }

    fn active_devices_done(&self) -> bool {
        self.active_devices.iter().all(|label| {
            self.device_states
                .get(label)
                .map_or(false, |state| ActorKind::Device.is_terminal(*state))
        })
    }

    fn check_deadline(&mut self) {
        let Some(limit) = self.config.timing.simulation_timeout() else {
            return;
        };
        if !self.timed_out && self.started.elapsed() >= limit {
            warn!(timeout_ms = limit.as_millis() as u64, "Simulation timed out");
            self.timed_out = true;
            self.shutdown_sent = true;
            self.controller.broadcast(SignalKind::Terminate);
        }
    }

    fn apply_connection_change(&mut self, change: ConnectionChange) -> Result<()> {
        let changed = match change.change {
            LinkChange::Drop => {
                self.topology.remove_edge(change.kind, &change.device, &change.peer)
            }
            LinkChange::Restore => {
                self.topology.restore_edge(change.kind, &change.device, &change.peer)
            }
        };
        info!(
            change = ?change.change,
            kind = %change.kind,
            device = %change.device,
            peer = %change.peer,
            changed,
            "Connection changed"
        );
        if changed {
            self.controller.broadcast(SignalKind::FlushRouteData);
        }
        Ok(())
    }

    fn find_route(&mut self, request: &Request) -> Result<()> {
        let RequestBody::FindRoute { kind, from, to } = &request.body else {
            return Ok(());
        };
        self.route_queries += 1;
        match self.topology.route(*kind, from, to) {
            Some(route) => {
                debug!(kind = %kind, from = %from, to = %to, hops = route.len() - 1, "Route found");
                request.respond(ActorKind::Kernel, exit_code::OK, RespondPayload::Route(route))
            }
            None => {
                debug!(kind = %kind, from = %from, to = %to, "No route");
                request.respond(ActorKind::Kernel, exit_code::NO_ROUTE, RespondPayload::Empty)
            }
        }
    }
}

impl ActorBehavior for KernelCore {
    fn kind(&self) -> ActorKind {
        ActorKind::Kernel
    }

    fn label(&self) -> &str {
        "kernel"
    }

    fn on_start(&mut self) -> Result<()> {
        let started = self.start();
        if let Err(e) = &started {
            self.start_error = Some(e.to_string());
            self.controller.broadcast(SignalKind::Terminate);
        }
        started
    }

    fn handle_signal(&mut self, signal: Signal) -> Result<Flow> {
        self.check_deadline();
        match signal.into_kind() {
            SignalKind::StateReport {
                actor: ActorKind::Device,
                label,
                state,
            } => {
                trace!(device = %label, state = %state, "Device state");
                self.device_states.insert(label, state);
                if ActorKind::Device.is_terminal(state) && self.active_devices_done() {
                    self.shutdown_remaining("all devices with applications ended");
                }
            }
            SignalKind::StateReport { actor, label, state } => {
                debug!(actor = ?actor, label = %label, state = %state, "State report");
            }
            SignalKind::ConnectionChanged(change) => self.apply_connection_change(change)?,
            SignalKind::MayEnd { label } => debug!(miner = %label, "Miner may end"),
            SignalKind::EndSimulation => {
                info!("All miners quiescent");
                return Ok(Flow::Stop);
            }
            SignalKind::Terminate => {
                self.shutdown_sent = true;
                self.controller.broadcast(SignalKind::Terminate);
            }
            other => return Err(SimError::unexpected(ActorKind::Kernel, other.name())),
        }
        Ok(Flow::Continue)
    }

    fn handle_request(&mut self, request: Request) -> Result<Flow> {
        self.check_deadline();
        match &request.body {
            RequestBody::FindRoute { .. } => self.find_route(&request)?,
            RequestBody::Backend(call) => match self.backend.call(call.clone()) {
                Ok(reply) => request.respond(
                    ActorKind::Kernel,
                    exit_code::OK,
                    RespondPayload::Backend(reply),
                )?,
                Err(e) => {
                    warn!(call = ?call, error = %e, "Backend call failed");
                    request.respond(
                        ActorKind::Kernel,
                        e.exit_code(),
                        RespondPayload::Error(e.to_string()),
                    )?;
                }
            },
            other => {
                let name = other.name();
                request.respond(ActorKind::Kernel, exit_code::REJECTED, RespondPayload::Empty)?;
                return Err(SimError::unexpected(ActorKind::Kernel, name));
            }
        }
        Ok(Flow::Continue)
    }

    fn on_idle(&mut self) -> Result<Flow> {
        self.check_deadline();
        Ok(Flow::Continue)
    }

    fn on_stop(&mut self) {
        self.state.change_state(ActorState::Finished);
        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
        let detached = self
            .controller
            .join_all(self.config.timing.join_timeout() + Duration::from_millis(50));
        if detached > 0 {
            warn!(detached, "Miner threads detached");
        }
        self.state.change_state(ActorState::Stopped);
    }
}
