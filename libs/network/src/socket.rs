//! Network Socket
//!
//! Per-device dispatcher. A started socket runs up to four threads that
//! share one [`SocketShared`]:
//!
//! ```text
//!  requests ──▶ [socket loop]   Send / Relay / port ops / Pause / Resume
//!  classic  ──▶ [classic pump]  ┐
//!  quantum  ──▶ [quantum pump]  ┴─▶ process_inbound ──▶ apps | forward | routing
//!  timer    ──▶ [heartbeat]     ping / collect / drop silent ports
//! ```
//!
//! Pass-through devices run no heartbeat and relay every packet to the
//! other port of its kind without touching the hop counter.

use crate::channel::{ChannelEnd, Inbound};
use crate::heartbeat::{Heartbeat, HeartbeatControl, HeartbeatModule, Pong};
use crate::listener::{ListenerDecision, TrafficListener};
use crate::port_manager::PortManager;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use netsim_actors::{
    join_or_detach, liveness, run_actor, spawn_named, ActorBehavior, CancelToken, Flow, Liveness,
    ModuleRegistry, StateHandler,
};
use netsim_config::{HeartbeatMode, SimulationConfig};
use netsim_types::{
    exit_code, ActorKind, ActorState, DeviceIdentity, Message, Packet, PacketBody, PortKind,
    PortRef, ReplyTo, Request, RequestBody, RespondPayload, Result, ResultSink, Signal,
    SignalKind, SimError,
};
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// How a device takes part in traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceRole {
    #[default]
    Ordinary,
    /// On-the-go relay: no applications, no heartbeat, forwards everything
    PassThrough,
}

/// Traffic counters, dumped to the result sink at teardown
#[derive(Debug, Default)]
pub struct TrafficCounters {
    sent: AtomicU64,
    delivered: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
    lost: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficSnapshot {
    pub sent: u64,
    pub delivered: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub lost: u64,
}

impl TrafficCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of routing one outbound packet
enum Outbound {
    Done(i32),
    /// No direct port; hand the packet to the routing layer
    Delegate(Packet),
}

/// State shared by the socket's threads
pub struct SocketShared {
    identity: DeviceIdentity,
    role: DeviceRole,
    ports: Arc<RwLock<PortManager>>,
    apps: RwLock<HashMap<String, Sender<Packet>>>,
    routing: RwLock<Option<Sender<Message>>>,
    listener: Option<TrafficListener>,
    pongs: Option<Sender<Pong>>,
    forwarding: bool,
    paused: AtomicBool,
    stop: CancelToken,
    counters: TrafficCounters,
}

impl SocketShared {
    fn label(&self) -> &str {
        &self.identity.label
    }

    fn routing(&self) -> Option<Sender<Message>> {
        if !self.forwarding || self.role == DeviceRole::PassThrough {
            return None;
        }
        self.routing.read().clone()
    }

    /// Put `packet` on `port`, counting the hop on ordinary devices
    fn transmit(&self, port: PortRef, mut packet: Packet) -> Result<()> {
        if self.role == DeviceRole::Ordinary {
            packet.hops += 1;
        }
        let sent = self.ports.read().send(port, packet)?;
        if sent {
            TrafficCounters::bump(&self.counters.sent);
        } else {
            TrafficCounters::bump(&self.counters.lost);
        }
        Ok(())
    }

    fn direct_port(&self, kind: PortKind, label: &str) -> Option<PortRef> {
        self.ports.read().find_by_target_label(kind, label)
    }

    fn deliver_local(&self, packet: Packet) {
        let apps = self.apps.read();
        match packet.receiver_app.as_deref() {
            Some(app) => match apps.get(app) {
                Some(queue) if queue.send(packet.clone()).is_ok() => {
                    TrafficCounters::bump(&self.counters.delivered);
                }
                Some(_) => {
                    debug!(
                        device = %self.label(),
                        app,
                        "Application queue closed, dropping packet"
                    );
                    TrafficCounters::bump(&self.counters.dropped);
                }
                None => {
                    warn!(
                        device = %self.label(),
                        app,
                        packet_id = %packet.id,
                        "Unknown application, dropping packet"
                    );
                    TrafficCounters::bump(&self.counters.dropped);
                }
            },
            None => {
                let mut delivered = false;
                for queue in apps.values() {
                    delivered |= queue.send(packet.clone()).is_ok();
                }
                if delivered {
                    TrafficCounters::bump(&self.counters.delivered);
                } else {
                    TrafficCounters::bump(&self.counters.dropped);
                }
            }
        }
    }

    fn route_outbound(&self, packet: Packet) -> Outbound {
        if packet.is_broadcast() {
            let ports = self.ports.read().active_connected(packet.kind);
            if ports.is_empty() {
                return Outbound::Done(exit_code::NO_PORT);
            }
            for port in ports {
                if let Err(e) = self.transmit(port, packet.clone()) {
                    debug!(
                        device = %self.label(),
                        port = %port,
                        error = %e,
                        "Broadcast leg failed"
                    );
                }
            }
            return Outbound::Done(exit_code::OK);
        }

        if packet.is_addressed_to(self.label()) {
            self.deliver_local(packet);
            return Outbound::Done(exit_code::OK);
        }

        let receiver = packet.receiver.clone().unwrap_or_default();
        let direct = self.direct_port(packet.kind, &receiver);
        if let Some(port) = direct {
            return match self.transmit(port, packet) {
                Ok(()) => Outbound::Done(exit_code::OK),
                Err(e) => {
                    debug!(device = %self.label(), port = %port, error = %e, "Direct send failed");
                    Outbound::Done(e.exit_code())
                }
            };
        }

        if self.routing().is_some() {
            Outbound::Delegate(packet)
        } else {
            Outbound::Done(exit_code::NO_ROUTE)
        }
    }

    /// Relay to the other port of a pass-through device
    fn pass_through(&self, port: PortRef, packet: Packet) {
        let other = self.ports.read().other_port(port);
        match other {
            Some(other) => match self.transmit(other, packet) {
                Ok(()) => TrafficCounters::bump(&self.counters.forwarded),
                Err(e) => {
                    trace!(
                        device = %self.label(),
                        port = %other,
                        error = %e,
                        "Pass-through relay failed"
                    );
                    TrafficCounters::bump(&self.counters.dropped);
                }
            },
            None => TrafficCounters::bump(&self.counters.dropped),
        }
    }

    /// Inbound processing for one packet, in order: heartbeat frames,
    /// inactive port, hop limit, listener, pass-through, broadcast, local
    /// delivery, forwarding.
    pub fn process_inbound(&self, inbound: Inbound) {
        let Inbound { channel, packet } = inbound;
        let port = self.ports.read().find_by_channel(channel);
        let Some(port) = port else {
            trace!(device = %self.label(), channel = %channel, "Packet on unbound channel");
            return;
        };

        if packet.is_control() {
            if self.role == DeviceRole::PassThrough {
                self.pass_through(port, packet);
            } else {
                self.handle_control(port, packet);
            }
            return;
        }

        let active = self.ports.read().port(port).is_some_and(|slot| slot.is_active());
        if !active {
            TrafficCounters::bump(&self.counters.dropped);
            return;
        }

        if packet.hop_limit_exceeded() {
            warn!(
                device = %self.label(),
                packet_id = %packet.id,
                hops = packet.hops,
                max_hops = packet.max_hops,
                "Hop limit exceeded, dropping packet"
            );
            TrafficCounters::bump(&self.counters.dropped);
            return;
        }

        if let Some(listener) = &self.listener {
            if listener.observe(self.label(), port, &packet) == ListenerDecision::Drop {
                debug!(device = %self.label(), packet_id = %packet.id, "Listener dropped packet");
                TrafficCounters::bump(&self.counters.dropped);
                return;
            }
        }

        if self.role == DeviceRole::PassThrough {
            self.pass_through(port, packet);
            return;
        }

        if packet.is_broadcast() || packet.is_addressed_to(self.label()) {
            self.deliver_local(packet);
            return;
        }

        self.forward(packet);
    }

    /// Answer a ping, or hand a pong to the heartbeat collector
    fn handle_control(&self, port: PortRef, packet: Packet) {
        match packet.body {
            PacketBody::Ping {
                origin,
                sequence,
                sent_at,
            } => {
                self.ports.write().learn_peer(port, &origin, None);
                let pong = Packet::pong(packet.kind, &self.identity, sequence, sent_at);
                let answered = self.ports.read().send(port, pong);
                if let Err(e) = answered {
                    trace!(device = %self.label(), port = %port, error = %e, "Ping not answered");
                }
            }
            PacketBody::Pong {
                responder,
                sequence,
                sent_at,
            } => {
                if let Some(pongs) = &self.pongs {
                    let pong = Pong {
                        port,
                        responder,
                        sequence,
                        sent_at,
                    };
                    if pongs.send(pong).is_err() {
                        warn!(
                            device = %self.label(),
                            port = %port,
                            sequence,
                            "Pong arrived after heartbeat stopped"
                        );
                    }
                }
            }
            PacketBody::Classic(_) | PacketBody::Quantum(_) => {}
        }
    }

    fn forward(&self, packet: Packet) {
        let next_hop = packet
            .next_hop_after(self.label())
            .map(str::to_string)
            .and_then(|hop| self.direct_port(packet.kind, &hop));
        let receiver = packet.receiver.clone().unwrap_or_default();
        let port = next_hop.or_else(|| self.direct_port(packet.kind, &receiver));

        if let Some(port) = port {
            match self.transmit(port, packet) {
                Ok(()) => TrafficCounters::bump(&self.counters.forwarded),
                Err(e) => {
                    warn!(device = %self.label(), port = %port, error = %e, "Forwarding failed");
                    TrafficCounters::bump(&self.counters.dropped);
                }
            }
            return;
        }

        match self.routing() {
            Some(routing) => {
                let request = Request::new(
                    ActorKind::Socket,
                    ActorKind::RoutingLayer,
                    RequestBody::Forward { packet },
                );
                if request.process(&routing).is_err() {
                    TrafficCounters::bump(&self.counters.dropped);
                }
            }
            None => {
                warn!(
                    device = %self.label(),
                    receiver = %receiver,
                    code = exit_code::NO_ROUTE,
                    "No route and forwarding disabled, dropping packet"
                );
                TrafficCounters::bump(&self.counters.dropped);
            }
        }
    }
}

/// Request/signal loop of the socket
struct SocketActor {
    shared: Arc<SocketShared>,
    state: StateHandler,
    modules: ModuleRegistry,
    heartbeat: Option<Sender<HeartbeatControl>>,
    sink: ResultSink,
}

impl SocketActor {
    fn reply(reply: Option<&ReplyTo>, asker: ActorKind, code: i32, payload: RespondPayload) {
        if let Some(reply) = reply {
            if let Err(e) = reply.respond(ActorKind::Socket, asker, code, payload) {
                trace!(error = %e, "Requester gone before reply");
            }
        }
    }

    fn port_result(result: Result<bool>) -> (i32, RespondPayload) {
        match result {
            Ok(changed) => (exit_code::OK, RespondPayload::Changed(changed)),
            Err(e) => (e.exit_code(), RespondPayload::Error(e.to_string())),
        }
    }

    fn send(&self, packet: Packet, reply: Option<ReplyTo>, asker: ActorKind) {
        if self.shared.paused.load(Ordering::Acquire) {
            Self::reply(reply.as_ref(), asker, exit_code::NOT_ACCEPTING, RespondPayload::Empty);
            return;
        }
        match self.shared.route_outbound(packet) {
            Outbound::Done(code) => Self::reply(reply.as_ref(), asker, code, RespondPayload::Empty),
            Outbound::Delegate(packet) => {
                let Some(routing) = self.shared.routing() else {
                    Self::reply(reply.as_ref(), asker, exit_code::NO_ROUTE, RespondPayload::Empty);
                    return;
                };
                // Routing layer answers the original requester
                let forward = Request::with_reply(
                    asker,
                    ActorKind::RoutingLayer,
                    RequestBody::Forward { packet },
                    reply.clone(),
                );
                if forward.process(&routing).is_err() {
                    Self::reply(reply.as_ref(), asker, exit_code::NO_ROUTE, RespondPayload::Empty);
                }
            }
        }
    }

    fn relay(&self, packet: Packet, next_hop: &str, reply: Option<ReplyTo>, asker: ActorKind) {
        let code = match self.shared.direct_port(packet.kind, next_hop) {
            Some(port) => match self.shared.transmit(port, packet) {
                Ok(()) => exit_code::OK,
                Err(e) => e.exit_code(),
            },
            None => exit_code::NO_PORT,
        };
        if code != exit_code::OK {
            debug!(device = %self.shared.label(), next_hop, code, "Relay failed");
        }
        Self::reply(reply.as_ref(), asker, code, RespondPayload::Empty);
    }

    fn set_paused(&mut self, paused: bool) -> bool {
        let changed = self.shared.paused.swap(paused, Ordering::AcqRel) != paused;
        if changed {
            let names: Vec<String> = self.modules.names().into_iter().map(str::to_string).collect();
            for name in names {
                if let Some(module) = self.modules.get_mut(&name) {
                    if paused {
                        module.pause();
                    } else {
                        module.enable();
                    }
                }
            }
            self.state
                .change_state(if paused { ActorState::Paused } else { ActorState::Up });
        }
        changed
    }
}

impl ActorBehavior for SocketActor {
    fn kind(&self) -> ActorKind {
        ActorKind::Socket
    }

    fn label(&self) -> &str {
        self.shared.label()
    }

    fn on_start(&mut self) -> Result<()> {
        self.state.change_state(ActorState::Up);
        Ok(())
    }

    fn handle_signal(&mut self, signal: Signal) -> Result<Flow> {
        match signal.kind() {
            SignalKind::Terminate => Ok(Flow::Stop),
            other => Err(SimError::unexpected(ActorKind::Socket, other.name())),
        }
    }

    fn handle_request(&mut self, request: Request) -> Result<Flow> {
        let asker = request.asker;
        let (body, reply) = request.into_parts();
        match body {
            RequestBody::Send { packet } => self.send(packet, reply, asker),
            RequestBody::Relay { packet, next_hop } => self.relay(packet, &next_hop, reply, asker),
            RequestBody::RefreshHeartbeat { report } => match &self.heartbeat {
                Some(control) => {
                    let command = HeartbeatControl::Refresh {
                        reply: reply.clone(),
                        asker,
                        report,
                    };
                    if control.send(command).is_err() {
                        Self::reply(
                            reply.as_ref(),
                            asker,
                            exit_code::NOT_ACCEPTING,
                            RespondPayload::Empty,
                        );
                    }
                }
                None => Self::reply(
                    reply.as_ref(),
                    asker,
                    exit_code::NOT_ACCEPTING,
                    RespondPayload::Empty,
                ),
            },
            RequestBody::SetPortActive { port, active } => {
                let result = {
                    let mut ports = self.shared.ports.write();
                    if active {
                        ports.activate(port)
                    } else {
                        ports.deactivate(port)
                    }
                };
                let (code, payload) = Self::port_result(result);
                Self::reply(reply.as_ref(), asker, code, payload);
            }
            RequestBody::UnconnectPort { port, soft } => {
                let result = self.shared.ports.write().unconnect(port, soft).map(|()| true);
                let (code, payload) = Self::port_result(result);
                Self::reply(reply.as_ref(), asker, code, payload);
            }
            RequestBody::ReconnectPort { port } => {
                let result = self.shared.ports.write().reconnect(port).map(|()| true);
                let (code, payload) = Self::port_result(result);
                Self::reply(reply.as_ref(), asker, code, payload);
            }
            RequestBody::PortStatus => {
                let snapshots = self.shared.ports.read().snapshots();
                Self::reply(reply.as_ref(), asker, exit_code::OK, RespondPayload::Ports(snapshots));
            }
            RequestBody::Pause => {
                let changed = self.set_paused(true);
                Self::reply(reply.as_ref(), asker, exit_code::OK, RespondPayload::Changed(changed));
            }
            RequestBody::Resume => {
                let changed = self.set_paused(false);
                Self::reply(reply.as_ref(), asker, exit_code::OK, RespondPayload::Changed(changed));
            }
            other @ (RequestBody::Forward { .. }
            | RequestBody::DeviceStatus
            | RequestBody::FindRoute { .. }
            | RequestBody::Backend(_)) => {
                Self::reply(reply.as_ref(), asker, exit_code::REJECTED, RespondPayload::Empty);
                return Err(SimError::unexpected(ActorKind::Socket, other.name()));
            }
        }
        Ok(Flow::Continue)
    }

    fn on_stop(&mut self) {
        self.modules.disable_all();
        if let Some(control) = &self.heartbeat {
            let _ = control.send(HeartbeatControl::Stop);
        }
        self.shared.stop.cancel();
        self.state.change_state(ActorState::Over);

        let stats = self.shared.counters.snapshot();
        info!(
            device = %self.shared.label(),
            sent = stats.sent,
            delivered = stats.delivered,
            forwarded = stats.forwarded,
            dropped = stats.dropped,
            "Socket closed"
        );
        self.sink.dump(
            self.shared.label(),
            "socket",
            json!({
                "sent": stats.sent,
                "delivered": stats.delivered,
                "forwarded": stats.forwarded,
                "dropped": stats.dropped,
                "lost": stats.lost,
            }),
        );
    }
}

fn pump(shared: Arc<SocketShared>, rx: Receiver<Inbound>, poll: Duration) {
    loop {
        if shared.stop.is_cancelled() {
            break;
        }
        match rx.recv_timeout(poll) {
            Ok(inbound) => shared.process_inbound(inbound),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// A socket that has been wired but not started
pub struct NetworkSocket {
    shared: Arc<SocketShared>,
    inbound: (Sender<Message>, Receiver<Message>),
    classic: (Sender<Inbound>, Receiver<Inbound>),
    quantum: (Sender<Inbound>, Receiver<Inbound>),
    heartbeat: Option<(Heartbeat, Sender<HeartbeatControl>)>,
    poll: Duration,
    join_timeout: Duration,
}

impl NetworkSocket {
    pub fn new(
        identity: DeviceIdentity,
        role: DeviceRole,
        config: &SimulationConfig,
        listener: Option<TrafficListener>,
    ) -> Self {
        let ports = Arc::new(RwLock::new(PortManager::new(
            identity.clone(),
            config.ports.classic_capacity,
            config.ports.quantum_capacity,
        )));

        let wants_heartbeat =
            role == DeviceRole::Ordinary && config.heartbeat.mode != HeartbeatMode::Disabled;
        let (heartbeat, pongs) = if wants_heartbeat {
            let (control_tx, control_rx) = unbounded();
            let (pong_tx, pong_rx) = unbounded();
            let heartbeat = Heartbeat::new(
                identity.clone(),
                ports.clone(),
                control_rx,
                pong_rx,
                config.heartbeat.clone(),
            );
            (Some((heartbeat, control_tx)), Some(pong_tx))
        } else {
            (None, None)
        };

        let shared = Arc::new(SocketShared {
            identity,
            role,
            ports,
            apps: RwLock::new(HashMap::new()),
            routing: RwLock::new(None),
            listener,
            pongs,
            forwarding: config.routing.forwarding,
            paused: AtomicBool::new(false),
            stop: CancelToken::new(),
            counters: TrafficCounters::default(),
        });

        Self {
            shared,
            inbound: unbounded(),
            classic: unbounded(),
            quantum: unbounded(),
            heartbeat,
            poll: config.timing.poll(),
            join_timeout: config.timing.join_timeout(),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.shared.identity
    }

    pub fn role(&self) -> DeviceRole {
        self.shared.role
    }

    /// Request queue of the socket loop
    pub fn inbound(&self) -> Sender<Message> {
        self.inbound.0.clone()
    }

    /// Queue a peer's channel end writes into
    pub fn packet_inbound(&self, kind: PortKind) -> Sender<Inbound> {
        match kind {
            PortKind::Classic => self.classic.0.clone(),
            PortKind::Quantum => self.quantum.0.clone(),
        }
    }

    pub fn ports(&self) -> Arc<RwLock<PortManager>> {
        self.shared.ports.clone()
    }

    pub fn connect(&self, end: ChannelEnd) -> Result<PortRef> {
        self.shared.ports.write().connect(end)
    }

    pub fn set_kernel(&self, kernel: Sender<Message>) {
        self.shared.ports.write().set_kernel(kernel);
    }

    pub fn set_routing(&self, routing: Sender<Message>) {
        *self.shared.routing.write() = Some(routing);
    }

    /// Register the inbound packet queue of a local application
    pub fn register_app(&self, label: impl Into<String>, queue: Sender<Packet>) -> Result<()> {
        register_app(&self.shared, label.into(), queue)
    }

    /// Spawn the socket's threads
    pub fn start(
        self,
        sink: ResultSink,
        report_target: Option<Sender<Message>>,
    ) -> Result<SocketHandle> {
        let label = self.shared.identity.label.clone();
        let mut threads = Vec::new();
        let mut modules = ModuleRegistry::new();

        let heartbeat_control = match self.heartbeat {
            Some((heartbeat, control)) => {
                modules.attach(Box::new(HeartbeatModule::new(control.clone())))?;
                let (guard, alive) = liveness(format!("{}-heartbeat", label));
                let handle = spawn_named(format!("{}-heartbeat", label), move || {
                    let _guard = guard;
                    heartbeat.run();
                })?;
                threads.push((handle, alive));
                Some(control)
            }
            None => None,
        };
        if let Some(listener) = &self.shared.listener {
            modules.attach(Box::new(listener.module()))?;
        }

        for (kind, rx) in [
            (PortKind::Classic, self.classic.1),
            (PortKind::Quantum, self.quantum.1),
        ] {
            let name = format!("{}-{}-pump", label, kind);
            let (guard, alive) = liveness(name.clone());
            let shared = self.shared.clone();
            let poll = self.poll;
            let handle = spawn_named(name, move || {
                let _guard = guard;
                pump(shared, rx, poll);
            })?;
            threads.push((handle, alive));
        }

        let mut state = StateHandler::new(ActorKind::Socket, label.clone());
        state.set_report_target(report_target);
        let mut actor = SocketActor {
            shared: self.shared.clone(),
            state,
            modules,
            heartbeat: heartbeat_control,
            sink,
        };
        let inbound_rx = self.inbound.1;
        let poll = self.poll;
        let (guard, alive) = liveness(format!("{}-socket", label));
        let handle = spawn_named(format!("{}-socket", label), move || {
            let _guard = guard;
            run_actor(&mut actor, &inbound_rx, poll);
        })?;
        threads.push((handle, alive));

        debug!(device = %label, threads = threads.len(), "Socket started");
        Ok(SocketHandle {
            shared: self.shared,
            inbound: self.inbound.0,
            threads,
            join_timeout: self.join_timeout,
        })
    }
}

fn register_app(shared: &SocketShared, label: String, queue: Sender<Packet>) -> Result<()> {
    let mut apps = shared.apps.write();
    if apps.contains_key(&label) {
        return Err(SimError::duplicate(format!("application on {}", shared.identity), label));
    }
    apps.insert(label, queue);
    Ok(())
}

/// A running socket
pub struct SocketHandle {
    shared: Arc<SocketShared>,
    inbound: Sender<Message>,
    threads: Vec<(JoinHandle<()>, Liveness)>,
    join_timeout: Duration,
}

impl SocketHandle {
    pub fn identity(&self) -> &DeviceIdentity {
        &self.shared.identity
    }

    pub fn inbound(&self) -> &Sender<Message> {
        &self.inbound
    }

    pub fn ports(&self) -> Arc<RwLock<PortManager>> {
        self.shared.ports.clone()
    }

    pub fn counters(&self) -> TrafficSnapshot {
        self.shared.counters.snapshot()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    pub fn set_routing(&self, routing: Sender<Message>) {
        *self.shared.routing.write() = Some(routing);
    }

    pub fn register_app(&self, label: impl Into<String>, queue: Sender<Packet>) -> Result<()> {
        register_app(&self.shared, label.into(), queue)
    }

    /// Stop every socket thread. Returns false if one had to be detached.
    pub fn terminate(self) -> bool {
        let _ = Signal::send(ActorKind::Device, SignalKind::Terminate, &self.inbound);
        self.shared.stop.cancel();
        let mut clean = true;
        for (handle, alive) in self.threads {
            clean &= join_or_detach(handle, &alive, self.join_timeout);
        }
        clean
    }
}
