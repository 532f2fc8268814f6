//! Message Protocol
//!
//! Actors talk through three message types:
//!
//! - [`Signal`]: one-way, emitted at most once per instance
//! - [`Request`]: enqueued on the target's inbound queue, optionally carrying a
//!   reply address with a freshly generated correlation id
//! - [`Respond`]: enqueued on the requester's respond queue, matched by
//!   correlation id
//!
//! Signal and request kinds are closed enums so every actor loop matches
//! exhaustively and a new kind is a compile-time checked change.

use crate::error::{Result, SimError};
use crate::identity::{CorrelationId, DeviceIdentity, PortKind, PortRef, QubitHandle};
use crate::packet::Packet;
use crate::state::{ActorKind, ActorState};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Exit codes carried by `Respond`. Negative values are recoverable
/// protocol failures.
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const NO_ROUTE: i32 = -1;
    pub const NO_PORT: i32 = -2;
    pub const PORT_UNAVAILABLE: i32 = -3;
    pub const TIMEOUT: i32 = -4;
    pub const DROPPED: i32 = -5;
    pub const NOT_ACCEPTING: i32 = -6;
    pub const BACKEND_FAILURE: i32 = -7;
    pub const REJECTED: i32 = -8;

    pub fn is_success(code: i32) -> bool {
        code >= 0
    }
}

/// Anything an actor may find on its inbound queue
#[derive(Debug)]
pub enum Message {
    Signal(Signal),
    Request(Request),
}

impl Message {
    /// Short name used in logs and unexpected-message errors
    pub fn describe(&self) -> String {
        match self {
            Message::Signal(signal) => format!("signal {}", signal.kind().name()),
            Message::Request(request) => format!("request {}", request.body.name()),
        }
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Direction of a topology change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkChange {
    Drop,
    Restore,
}

/// Port connection change reported to the kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionChange {
    pub change: LinkChange,
    pub kind: PortKind,
    /// Device whose port changed
    pub device: String,
    /// Device on the other end of the channel
    pub peer: String,
}

/// Why a device is ending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// Watcher saw every non-static application exit
    AllApplicationsExited,
    /// An application asked for it
    Requested,
    /// The parent tier is shutting everything down
    Shutdown,
}

/// One-way signal kinds
#[derive(Debug, Clone)]
pub enum SignalKind {
    StateReport {
        actor: ActorKind,
        label: String,
        state: ActorState,
    },
    ConnectionChanged(ConnectionChange),
    FlushRouteData,
    EndDevice {
        reason: EndReason,
    },
    /// Watcher saw every child quiescent
    MayEnd {
        label: String,
    },
    EndSimulation,
    /// Cooperative stop for the receiving actor
    Terminate,
}

impl SignalKind {
    pub fn name(&self) -> &'static str {
        match self {
            SignalKind::StateReport { .. } => "StateReport",
            SignalKind::ConnectionChanged(_) => "ConnectionChanged",
            SignalKind::FlushRouteData => "FlushRouteData",
            SignalKind::EndDevice { .. } => "EndDevice",
            SignalKind::MayEnd { .. } => "MayEnd",
            SignalKind::EndSimulation => "EndSimulation",
            SignalKind::Terminate => "Terminate",
        }
    }
}

/// One-way, single-delivery message
#[derive(Debug, Clone)]
pub struct Signal {
    kind: SignalKind,
    source: ActorKind,
    emitted: bool,
}

impl Signal {
    pub fn new(source: ActorKind, kind: SignalKind) -> Self {
        Self {
            kind,
            source,
            emitted: false,
        }
    }

    pub fn kind(&self) -> &SignalKind {
        &self.kind
    }

    pub fn source(&self) -> ActorKind {
        self.source
    }

    pub fn into_kind(self) -> SignalKind {
        self.kind
    }

    pub fn is_emitted(&self) -> bool {
        self.emitted
    }

    /// Enqueue this signal on `target`. A second call on the same instance
    /// fails with `AlreadyEmitted` and enqueues nothing.
    pub fn emit(&mut self, target: &Sender<Message>) -> Result<()> {
        if self.emitted {
            return Err(SimError::AlreadyEmitted {
                kind: self.kind.name().to_string(),
            });
        }
        self.emitted = true;
        target
            .send(Message::Signal(self.clone()))
            .map_err(|_| SimError::queue_closed(format!("signal {}", self.kind.name())))
    }

    /// Build and emit in one step
    pub fn send(source: ActorKind, kind: SignalKind, target: &Sender<Message>) -> Result<()> {
        Signal::new(source, kind).emit(target)
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Calls forwarded opaquely to the backend collaborator
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Allocate {
        count: usize,
        options: Value,
    },
    Measure {
        handles: Vec<QubitHandle>,
        options: Value,
    },
    ApplyGate {
        gate: String,
        args: Vec<f64>,
        handles: Vec<QubitHandle>,
        options: Value,
    },
    ApplyChannelError {
        handles: Vec<QubitHandle>,
        probability: f64,
    },
    Reset {
        handles: Vec<QubitHandle>,
    },
}

/// Backend call results
#[derive(Debug, Clone, PartialEq)]
pub enum BackendReply {
    Handles(Vec<QubitHandle>),
    Measurements(Vec<u8>),
    Done,
}

/// Request kinds, grouped by target actor
#[derive(Debug, Clone)]
pub enum RequestBody {
    // Socket
    /// Outbound packet from a local application
    Send { packet: Packet },
    /// Send along a resolved route; issued by the routing layer
    Relay { packet: Packet, next_hop: String },
    /// One manual heartbeat cycle
    RefreshHeartbeat { report: bool },
    SetPortActive { port: PortRef, active: bool },
    UnconnectPort { port: PortRef, soft: bool },
    ReconnectPort { port: PortRef },
    PortStatus,
    Pause,
    Resume,

    // Routing layer
    Forward { packet: Packet },

    // Device
    DeviceStatus,

    // Kernel
    FindRoute {
        kind: PortKind,
        from: String,
        to: String,
    },
    Backend(BackendCall),
}

impl RequestBody {
    pub fn name(&self) -> &'static str {
        match self {
            RequestBody::Send { .. } => "Send",
            RequestBody::Relay { .. } => "Relay",
            RequestBody::RefreshHeartbeat { .. } => "RefreshHeartbeat",
            RequestBody::SetPortActive { .. } => "SetPortActive",
            RequestBody::UnconnectPort { .. } => "UnconnectPort",
            RequestBody::ReconnectPort { .. } => "ReconnectPort",
            RequestBody::PortStatus => "PortStatus",
            RequestBody::Pause => "Pause",
            RequestBody::Resume => "Resume",
            RequestBody::Forward { .. } => "Forward",
            RequestBody::DeviceStatus => "DeviceStatus",
            RequestBody::FindRoute { .. } => "FindRoute",
            RequestBody::Backend(_) => "Backend",
        }
    }
}

/// Where a Respond must go
#[derive(Debug, Clone)]
pub struct ReplyTo {
    pub correlation_id: CorrelationId,
    pub queue: Sender<Respond>,
}

/// Two-way message
#[derive(Debug, Clone)]
pub struct Request {
    pub asker: ActorKind,
    pub target: ActorKind,
    pub body: RequestBody,
    reply: Option<ReplyTo>,
}

impl Request {
    /// Fire-and-forget request, no correlation id
    pub fn new(asker: ActorKind, target: ActorKind, body: RequestBody) -> Self {
        Self {
            asker,
            target,
            body,
            reply: None,
        }
    }

    /// Request that wants a response on `respond_queue`; generates a new
    /// correlation id
    pub fn with_response(
        asker: ActorKind,
        target: ActorKind,
        body: RequestBody,
        respond_queue: &Sender<Respond>,
    ) -> Self {
        let reply = ReplyTo {
            correlation_id: CorrelationId::new(),
            queue: respond_queue.clone(),
        };
        Self::with_reply(asker, target, body, Some(reply))
    }

    /// Request reusing an existing reply address, used when delegating work
    /// so the final actor answers the original requester
    pub fn with_reply(
        asker: ActorKind,
        target: ActorKind,
        body: RequestBody,
        reply: Option<ReplyTo>,
    ) -> Self {
        Self {
            asker,
            target,
            body,
            reply,
        }
    }

    pub fn wants_response(&self) -> bool {
        self.reply.is_some()
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.reply.as_ref().map(|reply| reply.correlation_id)
    }

    pub fn reply(&self) -> Option<&ReplyTo> {
        self.reply.as_ref()
    }

    pub fn into_parts(self) -> (RequestBody, Option<ReplyTo>) {
        (self.body, self.reply)
    }

    /// Enqueue on the target actor's inbound queue
    pub fn process(self, target: &Sender<Message>) -> Result<()> {
        let name = self.body.name();
        target
            .send(Message::Request(self))
            .map_err(|_| SimError::queue_closed(format!("request {}", name)))
    }

    /// Answer this request. No-op when no response was asked for.
    pub fn respond(&self, giver: ActorKind, exit_code: i32, payload: RespondPayload) -> Result<()> {
        match &self.reply {
            Some(reply) => reply.respond(giver, self.asker, exit_code, payload),
            None => Ok(()),
        }
    }
}

impl ReplyTo {
    /// Build and enqueue a Respond for this reply address
    pub fn respond(
        &self,
        giver: ActorKind,
        target: ActorKind,
        exit_code: i32,
        payload: RespondPayload,
    ) -> Result<()> {
        Respond {
            correlation_id: self.correlation_id,
            giver,
            target,
            exit_code,
            payload,
        }
        .process(&self.queue)
    }
}

// ---------------------------------------------------------------------------
// Responds
// ---------------------------------------------------------------------------

/// Snapshot of one port, returned by `PortStatus`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSnapshot {
    pub port: PortRef,
    pub active: bool,
    pub connected: bool,
    pub bound: bool,
    pub target: Option<DeviceIdentity>,
    pub latency: Option<Duration>,
}

/// Result of one heartbeat cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    /// Liveness per pinged port
    pub liveness: Vec<(PortRef, bool)>,
    pub elapsed: Duration,
}

impl HeartbeatReport {
    pub fn is_alive(&self, port: PortRef) -> Option<bool> {
        self.liveness
            .iter()
            .find(|(candidate, _)| *candidate == port)
            .map(|(_, alive)| *alive)
    }
}

/// Respond payloads
#[derive(Debug, Clone, PartialEq)]
pub enum RespondPayload {
    Empty,
    Route(Vec<String>),
    Heartbeat(HeartbeatReport),
    Ports(Vec<PortSnapshot>),
    Backend(BackendReply),
    DeviceStatus {
        state: ActorState,
        applications: Vec<(String, ActorState)>,
    },
    Changed(bool),
    Error(String),
}

/// Answer to a Request
#[derive(Debug, Clone)]
pub struct Respond {
    pub correlation_id: CorrelationId,
    pub giver: ActorKind,
    pub target: ActorKind,
    pub exit_code: i32,
    pub payload: RespondPayload,
}

impl Respond {
    pub fn is_success(&self) -> bool {
        exit_code::is_success(self.exit_code)
    }

    /// Enqueue on the original requester's respond queue
    pub fn process(self, queue: &Sender<Respond>) -> Result<()> {
        queue
            .send(self)
            .map_err(|_| SimError::queue_closed("respond"))
    }
}
