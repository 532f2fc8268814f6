//! Device
//!
//! A device owns one socket, its routing layer (ordinary devices only) and
//! the application threads. A watcher polls the non-static applications and
//! signals `EndDevice` once they have all exited; a device without any
//! such application waits for its miner to end it.
//!
//! Teardown runs on the device thread in a fixed order: pause the socket,
//! drain in-flight traffic, stop applications and the routing layer, join
//! or detach them, stop the socket, dump the device log, report `Stopped`.

use crate::application::{AppWiring, ApplicationHandle, ApplicationManager, ApplicationSpec};
use crossbeam_channel::{unbounded, Receiver, Sender};
use netsim_actors::{
    liveness, queue_names, run_actor, spawn_named, ActorBehavior, CancelToken, Flow, Liveness,
    QueueManager, StateHandler, Watcher, WatcherHandle,
};
use netsim_config::SimulationConfig;
use netsim_network::{DeviceRole, NetworkSocket, RoutingLayer, SocketHandle};
use netsim_types::{
    exit_code, ActorKind, ActorState, DeviceIdentity, EndReason, Message, Packet, Request,
    RequestBody, RespondPayload, Result, ResultSink, Signal, SignalKind, SimError,
};
use serde_json::json;
use std::thread::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Label under which the routing layer is tracked
const ROUTING_APP: &str = "routing";

/// A wired device, ready to be placed on a miner
pub struct Device {
    identity: DeviceIdentity,
    role: DeviceRole,
    socket: NetworkSocket,
    apps: Vec<(ApplicationSpec, Receiver<Packet>)>,
    inbound: (Sender<Message>, Receiver<Message>),
    kernel: Sender<Message>,
    config: SimulationConfig,
    sink: ResultSink,
}

impl Device {
    pub fn new(
        socket: NetworkSocket,
        apps: Vec<ApplicationSpec>,
        kernel: Sender<Message>,
        config: SimulationConfig,
        sink: ResultSink,
    ) -> Result<Self> {
        let identity = socket.identity().clone();
        let role = socket.role();
        if role == DeviceRole::PassThrough && !apps.is_empty() {
            return Err(SimError::configuration(
                format!("pass-through device {} cannot host applications", identity),
                Some("applications"),
            ));
        }

        let mut wired = Vec::with_capacity(apps.len());
        for spec in apps {
            let (tx, rx) = ApplicationManager::inbox();
            socket.register_app(spec.label.clone(), tx)?;
            wired.push((spec, rx));
        }

        Ok(Self {
            identity,
            role,
            socket,
            apps: wired,
            inbound: unbounded(),
            kernel,
            config,
            sink,
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn label(&self) -> &str {
        &self.identity.label
    }

    pub fn role(&self) -> DeviceRole {
        self.role
    }

    /// Whether this device ends on its own once its applications exit
    pub fn has_workload(&self) -> bool {
        self.apps.iter().any(|(spec, _)| !spec.is_static)
    }

    pub fn inbound(&self) -> Sender<Message> {
        self.inbound.0.clone()
    }

    /// Start the device thread. State reports go to `report`.
    pub fn spawn(self, report: Sender<Message>) -> Result<HostedDevice> {
        let label = self.identity.label.clone();
        let inbound = self.inbound.0.clone();
        let has_workload = self.has_workload();
        let poll = self.config.timing.poll();
        let rx = self.inbound.1;

        let mut queues = QueueManager::new(label.clone());
        queues.register(queue_names::INBOUND, self.inbound.0)?;
        queues.register(queue_names::KERNEL, self.kernel)?;

        let mut actor = DeviceActor {
            state: StateHandler::new(ActorKind::Device, label.clone()).with_report_target(report),
            manager: ApplicationManager::new(label.clone(), self.config.timing.join_timeout()),
            identity: self.identity,
            role: self.role,
            socket: Some(self.socket),
            running: None,
            pending: self.apps,
            queues,
            watcher: None,
            config: self.config,
            sink: self.sink,
            ended: false,
        };

        let (guard, alive) = liveness(label.clone());
        let handle = spawn_named(format!("device-{}", label), move || {
            let _guard = guard;
            run_actor(&mut actor, &rx, poll);
        })?;

        Ok(HostedDevice {
            label,
            inbound,
            has_workload,
            liveness: alive,
            handle: Some(handle),
        })
    }
}

/// A running device as seen by its miner
#[derive(Debug)]
pub struct HostedDevice {
    pub label: String,
    pub inbound: Sender<Message>,
    pub has_workload: bool,
    pub liveness: Liveness,
    pub handle: Option<JoinHandle<()>>,
}

struct DeviceActor {
    identity: DeviceIdentity,
    role: DeviceRole,
    state: StateHandler,
    socket: Option<NetworkSocket>,
    running: Option<SocketHandle>,
    pending: Vec<(ApplicationSpec, Receiver<Packet>)>,
    manager: ApplicationManager,
    /// Named queues; socket and routing join on start
    queues: QueueManager,
    watcher: Option<WatcherHandle>,
    config: SimulationConfig,
    sink: ResultSink,
    ended: bool,
}

impl DeviceActor {
    fn queue(&self, name: &str) -> Result<Sender<Message>> {
        self.queues.require(name).cloned()
    }

    fn start_routing(&mut self, socket_queue: Sender<Message>) -> Result<Sender<Message>> {
        let label = self.identity.label.clone();
        let (tx, rx) = unbounded();
        let layer = RoutingLayer::new(
            label.clone(),
            socket_queue,
            self.queue(queue_names::KERNEL)?,
            &self.config,
            self.sink.clone(),
        )
        .with_report_target(self.queue(queue_names::INBOUND)?);

        let (guard, alive) = liveness(format!("{}-routing", label));
        let handle = spawn_named(format!("{}-routing", label), move || {
            let _guard = guard;
            layer.run(rx);
        })?;
        self.manager.adopt_system(ROUTING_APP, tx.clone(), alive, handle);
        Ok(tx)
    }

    fn start_watcher(&mut self) -> Result<()> {
        if !self.manager.has_workload() {
            debug!(device = %self.identity, "No workload, waiting for shutdown");
            return Ok(());
        }
        let mut check = self.manager.exit_check();
        let queue = self.queue(queue_names::INBOUND)?;
        let label = self.identity.label.clone();
        let watcher = Watcher::spawn(
            self.identity.label.clone(),
            self.config.timing.watcher_interval(),
            move || check.all_exited(),
            move || {
                let signal = SignalKind::EndDevice {
                    reason: EndReason::AllApplicationsExited,
                };
                if Signal::send(ActorKind::Device, signal, &queue).is_err() {
                    trace!(device = %label, "Device gone before watcher fired");
                }
            },
        )?;
        self.watcher = Some(watcher);
        Ok(())
    }

    fn end(&mut self, reason: EndReason) {
        if self.ended {
            return;
        }
        self.ended = true;
        let target = match reason {
            EndReason::AllApplicationsExited => ActorState::MayEnd,
            EndReason::Requested => ActorState::Finished,
            EndReason::Shutdown => ActorState::Terminated,
        };
        self.state.change_state(target);
        info!(device = %self.identity, reason = ?reason, "Device ending");

        if let Some(socket) = &self.running {
            let pause = Request::new(ActorKind::Device, ActorKind::Socket, RequestBody::Pause);
            if let Err(e) = pause.process(socket.inbound()) {
                debug!(device = %self.identity, error = %e, "Socket already gone");
            }
        }
        std::thread::sleep(self.config.timing.drain());

        self.manager.cancel_all();
        let detached = self.manager.join_all();
        if detached > 0 {
            warn!(device = %self.identity, detached, "Threads detached at teardown");
        }
        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }

        let (traffic, socket_clean) = match self.running.take() {
            Some(socket) => {
                let traffic = socket.counters();
                (Some(traffic), socket.terminate())
            }
            None => (None, true),
        };

        let history: Vec<String> = self
            .state
            .history()
            .iter()
            .map(|(state, _)| state.to_string())
            .collect();
        // Offset of the end decision from device creation
        let ended_after_ms = self
            .state
            .history()
            .last()
            .map(|(_, at)| at.as_millis() as u64);
        let applications: serde_json::Map<String, serde_json::Value> = self
            .manager
            .states()
            .into_iter()
            .map(|(label, state)| (label, json!(state)))
            .collect();
        self.sink.dump(
            self.identity.label.clone(),
            "device",
            json!({
                "role": format!("{:?}", self.role),
                "reason": reason,
                "history": history,
                "ended_after_ms": ended_after_ms,
                "applications": applications,
                "detached": detached,
                "socket_clean": socket_clean,
                "delivered": traffic.map(|t| t.delivered),
                "dropped": traffic.map(|t| t.dropped),
            }),
        );

        self.state.change_state(ActorState::Stopped);
    }
}

impl ActorBehavior for DeviceActor {
    fn kind(&self) -> ActorKind {
        ActorKind::Device
    }

    fn label(&self) -> &str {
        &self.identity.label
    }

    fn on_start(&mut self) -> Result<()> {
        self.state.change_state(ActorState::Running);
        let socket = self
            .socket
            .take()
            .ok_or_else(|| SimError::configuration("device started twice", None))?;
        let inbound = self.queue(queue_names::INBOUND)?;
        let kernel = self.queue(queue_names::KERNEL)?;
        let running = socket.start(self.sink.clone(), Some(inbound.clone()))?;
        let socket_queue = running.inbound().clone();
        self.queues.register(queue_names::SOCKET, socket_queue.clone())?;

        if self.role == DeviceRole::Ordinary {
            let routing = self.start_routing(socket_queue.clone())?;
            running.set_routing(routing.clone());
            self.queues.register(queue_names::ROUTING, routing)?;
        }
        self.running = Some(running);

        for (spec, inbox) in std::mem::take(&mut self.pending) {
            let wiring = AppWiring {
                device: self.identity.clone(),
                socket: socket_queue.clone(),
                device_queue: inbound.clone(),
                kernel: kernel.clone(),
                sink: self.sink.clone(),
            };
            let handle = ApplicationHandle::new(
                spec.label.clone(),
                spec.args.clone(),
                wiring,
                inbox,
                CancelToken::new(),
                &self.config,
            );
            self.manager.launch(spec, handle, inbound.clone())?;
        }

        self.start_watcher()?;
        info!(device = %self.identity, role = ?self.role, "Device started");
        Ok(())
    }

    fn handle_signal(&mut self, signal: Signal) -> Result<Flow> {
        match signal.into_kind() {
            SignalKind::StateReport {
                actor: ActorKind::Application,
                label,
                state,
            } => {
                trace!(device = %self.identity, app = %label, state = %state, "Application state");
                self.manager.record_state(&label, state);
            }
            SignalKind::StateReport { actor, state, .. } => {
                trace!(device = %self.identity, actor = ?actor, state = %state, "Layer state");
            }
            SignalKind::EndDevice { reason } => {
                self.end(reason);
                return Ok(Flow::Stop);
            }
            SignalKind::Terminate => {
                self.end(EndReason::Shutdown);
                return Ok(Flow::Stop);
            }
            SignalKind::FlushRouteData => {
                if let Some(routing) = self.queues.get(queue_names::ROUTING) {
                    Signal::send(ActorKind::Device, SignalKind::FlushRouteData, routing)?;
                }
            }
            other => return Err(SimError::unexpected(ActorKind::Device, other.name())),
        }
        Ok(Flow::Continue)
    }

    fn handle_request(&mut self, request: Request) -> Result<Flow> {
        match &request.body {
            RequestBody::DeviceStatus => {
                request.respond(
                    ActorKind::Device,
                    exit_code::OK,
                    RespondPayload::DeviceStatus {
                        state: self.state.current(),
                        applications: self.manager.states(),
                    },
                )?;
                Ok(Flow::Continue)
            }
            other => {
                let name = other.name();
                request.respond(ActorKind::Device, exit_code::REJECTED, RespondPayload::Empty)?;
                Err(SimError::unexpected(ActorKind::Device, name))
            }
        }
    }

    fn on_stop(&mut self) {
        self.end(EndReason::Shutdown);
    }
}
