//! Channels
//!
//! A channel binds one port on each of two devices. It is created once when
//! the topology is built and owns the transport between the two sockets:
//! each side holds a [`ChannelEnd`] whose sender feeds the peer socket's
//! per-kind inbound queue.

use crossbeam_channel::Sender;
use netsim_types::{ChannelId, DeviceIdentity, Packet, PortKind, Result, SimError};
use rand::Rng;

/// Attenuation per length unit, in dB
const QUANTUM_LOSS_DB_PER_UNIT: f64 = 0.2;

/// Packet arriving at a socket, tagged with the channel it came through
#[derive(Debug, Clone)]
pub struct Inbound {
    pub channel: ChannelId,
    pub packet: Packet,
}

/// Immutable description of one link
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    id: ChannelId,
    kind: PortKind,
    length: f64,
    left: DeviceIdentity,
    right: DeviceIdentity,
}

impl Channel {
    pub fn new(kind: PortKind, length: f64, left: DeviceIdentity, right: DeviceIdentity) -> Self {
        Self {
            id: ChannelId::new(),
            kind,
            length: length.max(0.0),
            left,
            right,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn kind(&self) -> PortKind {
        self.kind
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn left(&self) -> &DeviceIdentity {
        &self.left
    }

    pub fn right(&self) -> &DeviceIdentity {
        &self.right
    }

    /// Probability that one quantum transmission is lost. Classic channels
    /// are lossless.
    pub fn drop_probability(&self) -> f64 {
        match self.kind {
            PortKind::Classic => 0.0,
            PortKind::Quantum => 1.0 - 10f64.powf(-QUANTUM_LOSS_DB_PER_UNIT * self.length / 10.0),
        }
    }

    /// The other endpoint, as seen from `label`
    pub fn peer_of(&self, label: &str) -> Option<&DeviceIdentity> {
        if self.left.label == label {
            Some(&self.right)
        } else if self.right.label == label {
            Some(&self.left)
        } else {
            None
        }
    }

    /// Build `local`'s end of this channel. `peer_inbound` is the peer
    /// socket's inbound queue for this channel kind.
    pub fn end_for(
        &self,
        local: &DeviceIdentity,
        peer_inbound: Sender<Inbound>,
    ) -> Result<ChannelEnd> {
        let peer = self.peer_of(&local.label).cloned().ok_or_else(|| {
            SimError::configuration(
                format!("{} is not an endpoint of channel {}", local.label, self.id),
                Some("channels"),
            )
        })?;
        Ok(ChannelEnd {
            channel: self.id,
            kind: self.kind,
            drop_probability: self.drop_probability(),
            peer,
            outbound: peer_inbound,
        })
    }
}

/// One device's side of a channel
#[derive(Debug, Clone)]
pub struct ChannelEnd {
    channel: ChannelId,
    kind: PortKind,
    drop_probability: f64,
    peer: DeviceIdentity,
    outbound: Sender<Inbound>,
}

impl ChannelEnd {
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn kind(&self) -> PortKind {
        self.kind
    }

    /// Device on the other side of the wire
    pub fn peer(&self) -> &DeviceIdentity {
        &self.peer
    }

    /// Put a packet on the wire. Returns `Ok(false)` when a quantum payload
    /// was physically lost; heartbeat frames are never lost.
    pub fn transmit(&self, packet: Packet) -> Result<bool> {
        if !packet.is_control()
            && self.drop_probability > 0.0
            && rand::thread_rng().gen_bool(self.drop_probability.min(1.0))
        {
            tracing::trace!(
                channel = %self.channel,
                packet_id = %packet.id,
                "Packet lost in channel"
            );
            return Ok(false);
        }
        self.outbound
            .send(Inbound {
                channel: self.channel,
                packet,
            })
            .map_err(|_| SimError::port_unavailable(self.channel, "peer socket closed"))?;
        Ok(true)
    }
}
