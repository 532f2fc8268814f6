//! Routing Layer
//!
//! Path cache plus on-demand discovery for one device. A forwarding request
//! for a cached destination is relayed immediately. An uncached destination
//! triggers a single correlated `FindRoute` to the kernel; further requests
//! for the same destination queue behind that discovery and are released
//! together once the route arrives. `FlushRouteData` empties both caches,
//! and a route answered for a discovery issued before the flush is used for
//! its parked requests but not cached.
//!
//! Runs as a static system application of its device: it never blocks the
//! device's end detection.

use crossbeam_channel::{select, Receiver, Sender};
use netsim_actors::{ActorBehavior, Correlator, Flow, StateHandler, SupervisorDirective};
use netsim_config::SimulationConfig;
use netsim_types::{
    exit_code, ActorKind, ActorState, CorrelationId, Message, Packet, PortKind, ReplyTo, Request,
    RequestBody, Respond, RespondPayload, Result, ResultSink, Signal, SignalKind, SimError,
};
use serde_json::json;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

type RouteKey = (PortKind, String);

/// Forwarding request parked behind a discovery
#[derive(Debug)]
struct Pending {
    packet: Packet,
    reply: Option<ReplyTo>,
    asker: ActorKind,
}

#[derive(Debug)]
struct Discovery {
    key: RouteKey,
    deadline: Instant,
    generation: u64,
}

/// Routing counters, dumped to the result sink at teardown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutingStats {
    pub discoveries: u64,
    pub cache_hits: u64,
    pub relayed: u64,
    pub failures: u64,
}

pub struct RoutingLayer {
    label: String,
    socket: Sender<Message>,
    kernel: Sender<Message>,
    correlator: Correlator,
    classic_routes: HashMap<String, Vec<String>>,
    quantum_routes: HashMap<String, Vec<String>>,
    in_flight: HashMap<CorrelationId, Discovery>,
    waiting: HashMap<RouteKey, Vec<Pending>>,
    /// Bumped on every flush
    generation: u64,
    state: StateHandler,
    stats: RoutingStats,
    sink: ResultSink,
    timeout: Duration,
    poll: Duration,
}

impl RoutingLayer {
    pub fn new(
        label: impl Into<String>,
        socket: Sender<Message>,
        kernel: Sender<Message>,
        config: &SimulationConfig,
        sink: ResultSink,
    ) -> Self {
        let label = label.into();
        Self {
            state: StateHandler::new(ActorKind::RoutingLayer, label.clone()),
            label,
            socket,
            kernel,
            correlator: Correlator::new(
                config.timing.request_timeout(),
                config.timing.response_grace(),
            ),
            classic_routes: HashMap::new(),
            quantum_routes: HashMap::new(),
            in_flight: HashMap::new(),
            waiting: HashMap::new(),
            generation: 0,
            stats: RoutingStats::default(),
            sink,
            timeout: config.timing.request_timeout(),
            poll: config.timing.poll(),
        }
    }

    pub fn with_report_target(mut self, target: Sender<Message>) -> Self {
        self.state.set_report_target(Some(target));
        self
    }

    pub fn stats(&self) -> RoutingStats {
        self.stats
    }

    fn routes(&self, kind: PortKind) -> &HashMap<String, Vec<String>> {
        match kind {
            PortKind::Classic => &self.classic_routes,
            PortKind::Quantum => &self.quantum_routes,
        }
    }

    fn routes_mut(&mut self, kind: PortKind) -> &mut HashMap<String, Vec<String>> {
        match kind {
            PortKind::Classic => &mut self.classic_routes,
            PortKind::Quantum => &mut self.quantum_routes,
        }
    }

    pub fn cached_route(&self, kind: PortKind, destination: &str) -> Option<&[String]> {
        self.routes(kind).get(destination).map(Vec::as_slice)
    }

    /// Drive the layer until `Terminate` or its inbound queue closes
    pub fn run(mut self, inbound: Receiver<Message>) -> RoutingStats {
        let responds = self.correlator.respond_receiver().clone();
        let poll = self.poll;
        if let Err(e) = self.on_start() {
            warn!(device = %self.label, error = %e, "Routing layer failed to start");
        }

        loop {
            let outcome = select! {
                recv(inbound) -> message => match message {
                    Ok(Message::Signal(signal)) => self.handle_signal(signal),
                    Ok(Message::Request(request)) => self.handle_request(request),
                    Err(_) => Ok(Flow::Stop),
                },
                recv(responds) -> respond => match respond {
                    Ok(respond) => {
                        self.on_respond(respond);
                        Ok(Flow::Continue)
                    }
                    Err(_) => Ok(Flow::Continue),
                },
                default(poll) => self.on_idle(),
            };

            // Steady traffic never reaches the idle branch
            if self.next_deadline().is_some_and(|deadline| deadline <= Instant::now()) {
                self.expire_discoveries();
            }

            match outcome {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(e) => {
                    if self.on_error(&e) == SupervisorDirective::Stop {
                        break;
                    }
                }
            }
        }

        self.on_stop();
        self.stats
    }

    fn forward(&mut self, packet: Packet, reply: Option<ReplyTo>, asker: ActorKind) {
        let Some(destination) = packet.receiver.clone() else {
            Self::answer(reply.as_ref(), asker, exit_code::NO_ROUTE);
            return;
        };
        let kind = packet.kind;

        if let Some(route) = self.routes(kind).get(&destination).cloned() {
            self.stats.cache_hits += 1;
            trace!(device = %self.label, destination = %destination, "Route cache hit");
            self.relay(packet, &route, reply, asker);
            return;
        }

        let key = (kind, destination);
        let pending = Pending {
            packet,
            reply,
            asker,
        };
        if let Some(queue) = self.waiting.get_mut(&key) {
            // Discovery already in flight for this destination
            queue.push(pending);
            return;
        }

        let request = self.correlator.issue(
            ActorKind::RoutingLayer,
            ActorKind::Kernel,
            RequestBody::FindRoute {
                kind,
                from: self.label.clone(),
                to: key.1.clone(),
            },
        );
        let Some(id) = request.correlation_id() else {
            return;
        };
        if let Err(e) = request.process(&self.kernel) {
            warn!(device = %self.label, error = %e, "Kernel unreachable, cannot discover route");
            self.stats.failures += 1;
            Self::answer(pending.reply.as_ref(), pending.asker, exit_code::NO_ROUTE);
            return;
        }

        self.stats.discoveries += 1;
        debug!(device = %self.label, kind = %kind, destination = %key.1, "Route discovery issued");
        self.in_flight.insert(
            id,
            Discovery {
                key: key.clone(),
                deadline: Instant::now() + self.timeout,
                generation: self.generation,
            },
        );
        self.waiting.insert(key, vec![pending]);
    }

    fn on_respond(&mut self, respond: Respond) {
        let Some(respond) = self.correlator.accept(respond) else {
            return;
        };
        let Some(discovery) = self.in_flight.remove(&respond.correlation_id) else {
            return;
        };
        let parked = self.waiting.remove(&discovery.key).unwrap_or_default();
        let (kind, destination) = discovery.key;

        match (respond.is_success(), respond.payload) {
            (true, RespondPayload::Route(route)) if route.len() >= 2 => {
                if discovery.generation == self.generation {
                    info!(
                        device = %self.label,
                        kind = %kind,
                        destination = %destination,
                        route = ?route,
                        "Route cached"
                    );
                    self.routes_mut(kind).insert(destination, route.clone());
                } else {
                    debug!(
                        device = %self.label,
                        destination = %destination,
                        "Route predates flush, relaying without caching"
                    );
                }
                for pending in parked {
                    self.relay(pending.packet, &route, pending.reply, pending.asker);
                }
            }
            _ => {
                warn!(
                    device = %self.label,
                    kind = %kind,
                    destination = %destination,
                    code = respond.exit_code,
                    "No route to destination, dropping packets"
                );
                self.stats.failures += parked.len() as u64;
                for pending in parked {
                    Self::answer(pending.reply.as_ref(), pending.asker, exit_code::NO_ROUTE);
                }
            }
        }
    }

    /// Hand `packet` to the socket for the hop after this device on `route`
    fn relay(
        &mut self,
        mut packet: Packet,
        route: &[String],
        reply: Option<ReplyTo>,
        asker: ActorKind,
    ) {
        let next_hop = route
            .iter()
            .position(|hop| *hop == self.label)
            .and_then(|position| route.get(position + 1))
            .cloned();
        let Some(next_hop) = next_hop else {
            warn!(device = %self.label, route = ?route, "Route does not pass through this device");
            self.stats.failures += 1;
            Self::answer(reply.as_ref(), asker, exit_code::NO_ROUTE);
            return;
        };

        packet.route = Some(route.to_vec());
        // The socket answers the original requester
        let request = Request::with_reply(
            asker,
            ActorKind::Socket,
            RequestBody::Relay { packet, next_hop },
            reply.clone(),
        );
        match request.process(&self.socket) {
            Ok(()) => self.stats.relayed += 1,
            Err(_) => Self::answer(reply.as_ref(), asker, exit_code::NOT_ACCEPTING),
        }
    }

    fn answer(reply: Option<&ReplyTo>, asker: ActorKind, code: i32) {
        if let Some(reply) = reply {
            let _ = reply.respond(ActorKind::RoutingLayer, asker, code, RespondPayload::Empty);
        }
    }

    fn flush(&mut self) {
        let dropped = self.classic_routes.len() + self.quantum_routes.len();
        self.classic_routes.clear();
        self.quantum_routes.clear();
        self.generation += 1;
        debug!(
            device = %self.label,
            dropped,
            generation = self.generation,
            "Route caches flushed"
        );
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.values().map(|discovery| discovery.deadline).min()
    }

    fn expire_discoveries(&mut self) {
        let now = Instant::now();
        let expired: Vec<CorrelationId> = self
            .in_flight
            .iter()
            .filter(|(_, discovery)| discovery.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(discovery) = self.in_flight.remove(&id) {
                let parked = self.waiting.remove(&discovery.key).unwrap_or_default();
                warn!(
                    device = %self.label,
                    destination = %discovery.key.1,
                    "Route discovery timed out"
                );
                self.stats.failures += parked.len() as u64;
                for pending in parked {
                    Self::answer(pending.reply.as_ref(), pending.asker, exit_code::TIMEOUT);
                }
            }
        }
        self.correlator.sweep();
    }
}

impl ActorBehavior for RoutingLayer {
    fn kind(&self) -> ActorKind {
        ActorKind::RoutingLayer
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn on_start(&mut self) -> Result<()> {
        self.state.try_change_state(ActorState::Running)?;
        Ok(())
    }

    fn handle_signal(&mut self, signal: Signal) -> Result<Flow> {
        match signal.kind() {
            SignalKind::FlushRouteData => {
                self.flush();
                Ok(Flow::Continue)
            }
            SignalKind::Terminate => Ok(Flow::Stop),
            other => Err(SimError::unexpected(ActorKind::RoutingLayer, other.name())),
        }
    }

    fn handle_request(&mut self, request: Request) -> Result<Flow> {
        let asker = request.asker;
        let (body, reply) = request.into_parts();
        match body {
            RequestBody::Forward { packet } => {
                self.forward(packet, reply, asker);
                Ok(Flow::Continue)
            }
            other => {
                Self::answer(reply.as_ref(), asker, exit_code::REJECTED);
                Err(SimError::unexpected(ActorKind::RoutingLayer, other.name()))
            }
        }
    }

    fn on_idle(&mut self) -> Result<Flow> {
        self.expire_discoveries();
        Ok(Flow::Continue)
    }

    fn on_stop(&mut self) {
        for (_, parked) in self.waiting.drain() {
            for pending in parked {
                Self::answer(pending.reply.as_ref(), pending.asker, exit_code::NOT_ACCEPTING);
            }
        }
        self.in_flight.clear();
        self.state.change_state(ActorState::Stopped);
        self.sink.dump(
            self.label.as_str(),
            "routing",
            json!({
                "discoveries": self.stats.discoveries,
                "cache_hits": self.stats.cache_hits,
                "relayed": self.stats.relayed,
                "failures": self.stats.failures,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use netsim_actors::spawn_named;
    use serde_json::json;
    use std::thread::JoinHandle;

    struct Fixture {
        inbound: Sender<Message>,
        socket: Receiver<Message>,
        kernel: Receiver<Message>,
        handle: JoinHandle<RoutingStats>,
        responds: Correlator,
    }

    fn fixture() -> Fixture {
        fixture_with(&SimulationConfig::default())
    }

    fn fixture_with(config: &SimulationConfig) -> Fixture {
        let (inbound_tx, inbound_rx) = unbounded();
        let (socket_tx, socket) = unbounded();
        let (kernel_tx, kernel) = unbounded();
        let (sink, _records) = ResultSink::new();
        let layer = RoutingLayer::new("a", socket_tx, kernel_tx, config, sink);
        let handle = spawn_named("a-routing", move || layer.run(inbound_rx)).unwrap();
        Fixture {
            inbound: inbound_tx,
            socket,
            kernel,
            handle,
            responds: Correlator::new(Duration::from_secs(2), Duration::from_secs(2)),
        }
    }

    fn forward(f: &mut Fixture, to: &str) -> CorrelationId {
        let packet = Packet::classic("a", json!("x"), 8).to(to);
        let request = f.responds.issue(
            ActorKind::Socket,
            ActorKind::RoutingLayer,
            RequestBody::Forward { packet },
        );
        let id = request.correlation_id().unwrap();
        request.process(&f.inbound).unwrap();
        id
    }

    fn next_request(rx: &Receiver<Message>) -> Request {
        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            Message::Request(request) => request,
            other => panic!("expected request, got {}", other.describe()),
        }
    }

    fn answer_route(request: &Request, route: &[&str]) {
        request
            .respond(
                ActorKind::Kernel,
                exit_code::OK,
                RespondPayload::Route(route.iter().map(|hop| hop.to_string()).collect()),
            )
            .unwrap();
    }

    fn stop(f: Fixture) -> RoutingStats {
        Signal::send(ActorKind::Device, SignalKind::Terminate, &f.inbound).unwrap();
        f.handle.join().unwrap()
    }

    #[test_log::test]
    fn test_cached_route_skips_second_discovery_until_flush() {
        let mut f = fixture();

        forward(&mut f, "c");
        let find = next_request(&f.kernel);
        assert!(matches!(find.body, RequestBody::FindRoute { ref to, .. } if to == "c"));
        answer_route(&find, &["a", "b", "c"]);
        let relay = next_request(&f.socket);
        match &relay.body {
            RequestBody::Relay { packet, next_hop } => {
                assert_eq!(next_hop, "b");
                assert_eq!(packet.route.as_deref().map(<[String]>::len), Some(3));
            }
            other => panic!("unexpected {}", other.name()),
        }

        forward(&mut f, "c");
        next_request(&f.socket);
        assert!(f.kernel.recv_timeout(Duration::from_millis(100)).is_err());

        Signal::send(ActorKind::Device, SignalKind::FlushRouteData, &f.inbound).unwrap();
        forward(&mut f, "c");
        let find = next_request(&f.kernel);
        assert!(matches!(find.body, RequestBody::FindRoute { .. }));
        answer_route(&find, &["a", "c"]);
        next_request(&f.socket);

        let stats = stop(f);
        assert_eq!(stats.discoveries, 2);
        assert_eq!(stats.cache_hits, 1);
    }

    #[test]
    fn test_concurrent_forwards_share_one_discovery() {
        let mut f = fixture();
        forward(&mut f, "z");
        forward(&mut f, "z");
        forward(&mut f, "z");

        let find = next_request(&f.kernel);
        assert!(f.kernel.recv_timeout(Duration::from_millis(100)).is_err());
        answer_route(&find, &["a", "z"]);

        for _ in 0..3 {
            let relay = next_request(&f.socket);
            assert!(matches!(
                relay.body,
                RequestBody::Relay { ref next_hop, .. } if next_hop == "z"
            ));
        }
        let stats = stop(f);
        assert_eq!(stats.discoveries, 1);
        assert_eq!(stats.relayed, 3);
    }

    #[test]
    fn test_unreachable_destination_answers_no_route() {
        let mut f = fixture();
        let id = forward(&mut f, "ghost");
        let find = next_request(&f.kernel);
        find.respond(ActorKind::Kernel, exit_code::NO_ROUTE, RespondPayload::Empty)
            .unwrap();

        let respond = f.responds.wait_for(id, Duration::from_secs(2), None).unwrap();
        assert_eq!(respond.exit_code, exit_code::NO_ROUTE);
        assert_eq!(respond.giver, ActorKind::RoutingLayer);
        let stats = stop(f);
        assert_eq!(stats.failures, 1);
    }

    #[test_log::test]
    fn test_discovery_expires_under_steady_traffic() {
        let mut config = SimulationConfig::default();
        config.timing.request_timeout_ms = 200;
        let mut f = fixture_with(&config);

        let id = forward(&mut f, "z");
        let find = next_request(&f.kernel);
        assert!(matches!(find.body, RequestBody::FindRoute { ref to, .. } if to == "z"));

        // Signals arrive faster than the idle poll
        let started = Instant::now();
        let mut answered = None;
        while answered.is_none() && started.elapsed() < Duration::from_secs(2) {
            Signal::send(ActorKind::Device, SignalKind::FlushRouteData, &f.inbound).unwrap();
            answered = f.responds.wait_for(id, Duration::from_millis(5), None);
        }

        let respond = answered.expect("discovery never expired while signals kept flowing");
        assert_eq!(respond.exit_code, exit_code::TIMEOUT);
        assert!(started.elapsed() < Duration::from_secs(1));
        let stats = stop(f);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.relayed, 0);
    }

    #[test_log::test]
    fn test_route_answered_after_flush_is_not_cached() {
        let mut f = fixture();

        forward(&mut f, "c");
        let find = next_request(&f.kernel);
        Signal::send(ActorKind::Device, SignalKind::FlushRouteData, &f.inbound).unwrap();
        // Let the flush land before the answer
        std::thread::sleep(Duration::from_millis(50));
        answer_route(&find, &["a", "b", "c"]);

        let relay = next_request(&f.socket);
        assert!(matches!(relay.body, RequestBody::Relay { ref next_hop, .. } if next_hop == "b"));

        forward(&mut f, "c");
        let find = next_request(&f.kernel);
        assert!(matches!(find.body, RequestBody::FindRoute { ref to, .. } if to == "c"));
        answer_route(&find, &["a", "b", "c"]);
        next_request(&f.socket);

        forward(&mut f, "c");
        next_request(&f.socket);
        assert!(f.kernel.recv_timeout(Duration::from_millis(100)).is_err());

        let stats = stop(f);
        assert_eq!(stats.discoveries, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.relayed, 3);
    }
}
