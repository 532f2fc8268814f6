//! Port Manager
//!
//! Fixed-capacity pools of classic and quantum ports for one device, with
//! lookup by index, channel id, target uuid and target label. The manager
//! is shared by the four loops of a single socket behind a `RwLock`; it is
//! the only shared mutable state in the simulator.
//!
//! Connection changes are reported to the kernel as
//! `ConnectionChanged(DROP | RESTORE)` signals so the live topology follows
//! the ports.

use crate::channel::ChannelEnd;
use crate::port::Port;
use crossbeam_channel::Sender;
use netsim_types::{
    ActorKind, ChannelId, ConnectionChange, DeviceId, DeviceIdentity, LinkChange, Message, Packet,
    PortKind, PortRef, PortSnapshot, Result, Signal, SignalKind, SimError,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Remembered binding of a soft-unconnected port
#[derive(Debug, Clone)]
struct SoftUnconnected {
    target: Option<DeviceIdentity>,
    channel: ChannelId,
}

#[derive(Debug)]
pub struct PortManager {
    owner: DeviceIdentity,
    classic: Vec<Port>,
    quantum: Vec<Port>,
    by_channel: HashMap<ChannelId, PortRef>,
    unconnected: HashMap<PortRef, SoftUnconnected>,
    kernel: Option<Sender<Message>>,
}

impl PortManager {
    pub fn new(owner: DeviceIdentity, classic_capacity: usize, quantum_capacity: usize) -> Self {
        Self {
            owner,
            classic: (0..classic_capacity).map(|i| Port::new(PortRef::classic(i))).collect(),
            quantum: (0..quantum_capacity).map(|i| Port::new(PortRef::quantum(i))).collect(),
            by_channel: HashMap::new(),
            unconnected: HashMap::new(),
            kernel: None,
        }
    }

    pub fn owner(&self) -> &DeviceIdentity {
        &self.owner
    }

    /// Queue receiving connection change signals
    pub fn set_kernel(&mut self, kernel: Sender<Message>) {
        self.kernel = Some(kernel);
    }

    fn pool(&self, kind: PortKind) -> &[Port] {
        match kind {
            PortKind::Classic => &self.classic,
            PortKind::Quantum => &self.quantum,
        }
    }

    fn pool_mut(&mut self, kind: PortKind) -> &mut Vec<Port> {
        match kind {
            PortKind::Classic => &mut self.classic,
            PortKind::Quantum => &mut self.quantum,
        }
    }

    pub fn capacity(&self, kind: PortKind) -> usize {
        self.pool(kind).len()
    }

    pub fn port(&self, port: PortRef) -> Option<&Port> {
        self.pool(port.kind).get(port.index)
    }

    fn port_mut(&mut self, port: PortRef) -> Result<&mut Port> {
        self.pool_mut(port.kind)
            .get_mut(port.index)
            .ok_or_else(|| SimError::port_not_found(port))
    }

    /// Bind `end` to a port. Binding a channel that is already bound on this
    /// device returns the existing port.
    pub fn connect(&mut self, end: ChannelEnd) -> Result<PortRef> {
        if let Some(existing) = self.by_channel.get(&end.channel()) {
            return Ok(*existing);
        }

        let kind = end.kind();
        let channel = end.channel();
        let peer = end.peer().label.clone();
        let device = self.owner.label.clone();
        let port = self
            .pool_mut(kind)
            .iter_mut()
            .find(|port| port.is_free())
            .ok_or(SimError::NoAvailablePort { device, kind })?;

        port.bind(end);
        let reference = port.reference();
        self.by_channel.insert(channel, reference);
        debug!(device = %self.owner.label, port = %reference, peer = %peer, "Port connected");
        Ok(reference)
    }

    /// Drop the connection on `port`. Soft keeps the channel so the port can
    /// be reconnected; hard releases it. Emits one `DROP` if the port was
    /// connected.
    pub fn unconnect(&mut self, port: PortRef, soft: bool) -> Result<()> {
        let owner = self.owner.label.clone();
        let slot = self.port_mut(port)?;
        let was_connected = slot.is_connected();
        let target = slot.target().cloned();
        let channel = slot.channel().map(|end| (end.channel(), end.peer().label.clone()));

        let released = slot.release(!soft);

        match (&channel, soft) {
            (Some((id, _)), true) if was_connected => {
                self.unconnected.insert(
                    port,
                    SoftUnconnected {
                        target,
                        channel: *id,
                    },
                );
            }
            (Some(_), false) => {
                self.unconnected.remove(&port);
            }
            _ => {}
        }
        if let Some(end) = released {
            self.by_channel.remove(&end.channel());
        }

        if was_connected {
            info!(device = %owner, port = %port, soft, "Port unconnected");
            if let Some((_, peer)) = channel {
                self.notify(LinkChange::Drop, port.kind, peer);
            }
        }
        Ok(())
    }

    /// Restore a soft-unconnected port
    pub fn reconnect(&mut self, port: PortRef) -> Result<()> {
        let remembered = self
            .unconnected
            .get(&port)
            .cloned()
            .ok_or_else(|| SimError::port_unavailable(port, "port is not soft-unconnected"))?;

        let slot = self.port_mut(port)?;
        let peer = match slot.channel() {
            Some(end) if end.channel() == remembered.channel => end.peer().label.clone(),
            _ => return Err(SimError::port_unavailable(port, "channel no longer bound")),
        };
        slot.set_connected(true);
        slot.set_active(true);
        slot.set_target(remembered.target);
        self.unconnected.remove(&port);

        info!(device = %self.owner, port = %port, "Port reconnected");
        self.notify(LinkChange::Restore, port.kind, peer);
        Ok(())
    }

    pub fn is_soft_unconnected(&self, port: PortRef) -> bool {
        self.unconnected.contains_key(&port)
    }

    /// Returns whether the flag changed
    pub fn activate(&mut self, port: PortRef) -> Result<bool> {
        Ok(self.port_mut(port)?.set_active(true))
    }

    pub fn deactivate(&mut self, port: PortRef) -> Result<bool> {
        Ok(self.port_mut(port)?.set_active(false))
    }

    /// Override the identity a port forwards to. Used when a pass-through
    /// device sits on the wire and the effective peer is further along.
    pub fn set_target(&mut self, port: PortRef, target: DeviceIdentity) -> Result<()> {
        self.port_mut(port)?.set_target(Some(target));
        Ok(())
    }

    /// Learn the peer behind a connected port from a heartbeat frame
    pub fn learn_peer(&mut self, port: PortRef, peer: &DeviceIdentity, latency: Option<Duration>) {
        if let Ok(slot) = self.port_mut(port) {
            if !slot.is_connected() {
                return;
            }
            if slot.target() != Some(peer) {
                slot.set_target(Some(peer.clone()));
            }
            if let Some(latency) = latency {
                slot.set_latency(latency);
            }
        }
    }

    pub fn find_by_channel(&self, channel: ChannelId) -> Option<PortRef> {
        self.by_channel.get(&channel).copied()
    }

    pub fn find_by_target_id(&self, kind: PortKind, target: DeviceId) -> Option<PortRef> {
        self.pool(kind)
            .iter()
            .find(|port| port.target().is_some_and(|t| t.id == target))
            .map(Port::reference)
    }

    /// Port whose target is the device labelled `label`, usable or not
    pub fn find_by_target_label(&self, kind: PortKind, label: &str) -> Option<PortRef> {
        self.pool(kind)
            .iter()
            .find(|port| port.target().is_some_and(|t| t.label == label))
            .map(Port::reference)
    }

    /// Ports that are active, connected and bound
    pub fn active_connected(&self, kind: PortKind) -> Vec<PortRef> {
        self.pool(kind)
            .iter()
            .filter(|port| port.is_usable())
            .map(Port::reference)
            .collect()
    }

    /// Ports with a channel bound
    pub fn bound(&self, kind: PortKind) -> Vec<PortRef> {
        self.pool(kind)
            .iter()
            .filter(|port| port.is_bound())
            .map(Port::reference)
            .collect()
    }

    /// For a pass-through device: the other bound port of the same kind
    pub fn other_port(&self, port: PortRef) -> Option<PortRef> {
        let bound = self.bound(port.kind);
        if bound.len() != 2 {
            warn!(
                device = %self.owner,
                kind = %port.kind,
                bound = bound.len(),
                "Pass-through needs exactly two ports"
            );
            return None;
        }
        bound.into_iter().find(|candidate| *candidate != port)
    }

    pub fn send(&self, port: PortRef, packet: Packet) -> Result<bool> {
        self.port(port)
            .ok_or_else(|| SimError::port_not_found(port))?
            .send(packet)
    }

    pub fn snapshots(&self) -> Vec<PortSnapshot> {
        self.classic
            .iter()
            .chain(self.quantum.iter())
            .filter(|port| port.is_bound() || port.is_connected())
            .map(Port::snapshot)
            .collect()
    }

    fn notify(&self, change: LinkChange, kind: PortKind, peer: String) {
        let Some(kernel) = &self.kernel else {
            return;
        };
        let signal = SignalKind::ConnectionChanged(ConnectionChange {
            change,
            kind,
            device: self.owner.label.clone(),
            peer,
        });
        if let Err(e) = Signal::send(ActorKind::Socket, signal, kernel) {
            debug!(device = %self.owner, error = %e, "Kernel gone, connection change not reported");
        }
    }
}
