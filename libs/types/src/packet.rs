//! Traffic Units
//!
//! A `Packet` is what travels over a channel: heartbeat control frames,
//! classic payloads and qubit handle batches. Packets are in-memory objects;
//! nothing here is ever serialized to bytes.

use crate::identity::{DeviceIdentity, PortKind, QubitHandle};
use serde_json::Value;
use std::time::Instant;
use uuid::Uuid;

/// Packet body
#[derive(Debug, Clone)]
pub enum PacketBody {
    /// Heartbeat ping
    Ping {
        origin: DeviceIdentity,
        sequence: u64,
        sent_at: Instant,
    },
    /// Heartbeat answer, echoes the ping's sequence and send time
    Pong {
        responder: DeviceIdentity,
        sequence: u64,
        sent_at: Instant,
    },
    /// Classic data
    Classic(Value),
    /// Qubits in flight
    Quantum(Vec<QubitHandle>),
}

/// Unit of traffic carried by channels
#[derive(Debug, Clone)]
pub struct Packet {
    pub id: Uuid,
    pub kind: PortKind,
    /// Label of the originating device
    pub sender: String,
    /// Label of the destination device, `None` for broadcasts
    pub receiver: Option<String>,
    pub sender_app: Option<String>,
    pub receiver_app: Option<String>,
    pub body: PacketBody,
    /// Number of transmissions so far
    pub hops: u32,
    /// Drop counter: packets with `hops > max_hops` are discarded
    pub max_hops: u32,
    /// Resolved route, source and destination inclusive
    pub route: Option<Vec<String>>,
}

impl Packet {
    fn new(kind: PortKind, sender: impl Into<String>, body: PacketBody, max_hops: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            sender: sender.into(),
            receiver: None,
            sender_app: None,
            receiver_app: None,
            body,
            hops: 0,
            max_hops,
            route: None,
        }
    }

    /// Classic data packet
    pub fn classic(sender: impl Into<String>, payload: Value, max_hops: u32) -> Self {
        Self::new(PortKind::Classic, sender, PacketBody::Classic(payload), max_hops)
    }

    /// Qubit packet
    pub fn quantum(sender: impl Into<String>, qubits: Vec<QubitHandle>, max_hops: u32) -> Self {
        Self::new(PortKind::Quantum, sender, PacketBody::Quantum(qubits), max_hops)
    }

    /// Heartbeat ping for one hop
    pub fn ping(kind: PortKind, origin: &DeviceIdentity, sequence: u64) -> Self {
        let body = PacketBody::Ping {
            origin: origin.clone(),
            sequence,
            sent_at: Instant::now(),
        };
        Self::new(kind, origin.label.clone(), body, u32::MAX)
    }

    /// Answer to a heartbeat ping
    pub fn pong(
        kind: PortKind,
        responder: &DeviceIdentity,
        sequence: u64,
        sent_at: Instant,
    ) -> Self {
        let body = PacketBody::Pong {
            responder: responder.clone(),
            sequence,
            sent_at,
        };
        Self::new(kind, responder.label.clone(), body, u32::MAX)
    }

    pub fn to(mut self, receiver: impl Into<String>) -> Self {
        self.receiver = Some(receiver.into());
        self
    }

    pub fn from_app(mut self, app: impl Into<String>) -> Self {
        self.sender_app = Some(app.into());
        self
    }

    pub fn for_app(mut self, app: impl Into<String>) -> Self {
        self.receiver_app = Some(app.into());
        self
    }

    /// Heartbeat frame (ping or pong)
    pub fn is_control(&self) -> bool {
        matches!(self.body, PacketBody::Ping { .. } | PacketBody::Pong { .. })
    }

    pub fn is_broadcast(&self) -> bool {
        self.receiver.is_none()
    }

    pub fn is_addressed_to(&self, label: &str) -> bool {
        self.receiver.as_deref() == Some(label)
    }

    pub fn hop_limit_exceeded(&self) -> bool {
        self.hops > self.max_hops
    }

    /// Next hop after `label` on the embedded route, if any
    pub fn next_hop_after(&self, label: &str) -> Option<&str> {
        let route = self.route.as_ref()?;
        let position = route.iter().position(|hop| hop == label)?;
        route.get(position + 1).map(String::as_str)
    }

    pub fn classic_payload(&self) -> Option<&Value> {
        match &self.body {
            PacketBody::Classic(value) => Some(value),
            _ => None,
        }
    }

    pub fn qubits(&self) -> Option<&[QubitHandle]> {
        match &self.body {
            PacketBody::Quantum(qubits) => Some(qubits),
            _ => None,
        }
    }
}
