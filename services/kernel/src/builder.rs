//! Simulation Builder
//!
//! Collects devices, applications and channels, validates the network and
//! wires it: one socket per device, one port per channel end, topology
//! edges for the kernel, devices placed on miners.
//!
//! Pass-through devices must have either zero or exactly two channels of
//! each kind. Ports of an ordinary device facing a pass-through chain get
//! the device at the far end of the chain as their target.

use crate::application::ApplicationSpec;
use crate::backend::{Backend, BitBackend};
use crate::controller::MinerController;
use crate::device::Device;
use crate::kernel::{Kernel, KernelParts, SimulationResult};
use crate::topology::Topology;
use crossbeam_channel::{unbounded, Receiver, Sender};
use netsim_config::SimulationConfig;
use netsim_network::{Channel, DeviceRole, NetworkSocket, Observation, TrafficListener};
use netsim_types::{ChannelId, DeviceIdentity, Message, PortKind, Result, ResultSink, SimError};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

struct DeviceEntry {
    identity: DeviceIdentity,
    role: DeviceRole,
    apps: Vec<ApplicationSpec>,
    listener: Option<TrafficListener>,
}

fn unknown_device(label: &str) -> SimError {
    SimError::configuration(format!("unknown device {}", label), Some("devices"))
}

pub struct SimulationBuilder {
    config: SimulationConfig,
    devices: Vec<DeviceEntry>,
    index: HashMap<String, usize>,
    channels: Vec<Channel>,
    backend: Option<Box<dyn Backend>>,
}

impl SimulationBuilder {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            devices: Vec::new(),
            index: HashMap::new(),
            channels: Vec::new(),
            backend: None,
        }
    }

    pub fn with_backend(mut self, backend: impl Backend + 'static) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn entry_mut(&mut self, label: &str) -> Result<&mut DeviceEntry> {
        let index = *self
            .index
            .get(label)
            .ok_or_else(|| unknown_device(label))?;
        Ok(&mut self.devices[index])
    }

    fn identity(&self, label: &str) -> Result<DeviceIdentity> {
        self.index
            .get(label)
            .map(|index| self.devices[*index].identity.clone())
            .ok_or_else(|| unknown_device(label))
    }

    pub fn add_device(&mut self, label: &str, role: DeviceRole) -> Result<DeviceIdentity> {
        if self.index.contains_key(label) {
            return Err(SimError::duplicate("device", label));
        }
        let identity = DeviceIdentity::new(label);
        self.index.insert(label.to_string(), self.devices.len());
        self.devices.push(DeviceEntry {
            identity: identity.clone(),
            role,
            apps: Vec::new(),
            listener: None,
        });
        Ok(identity)
    }

    pub fn add_application(&mut self, device: &str, spec: ApplicationSpec) -> Result<()> {
        let entry = self.entry_mut(device)?;
        if entry.role == DeviceRole::PassThrough {
            return Err(SimError::configuration(
                format!("pass-through device {} cannot host applications", device),
                Some("applications"),
            ));
        }
        if entry.apps.iter().any(|app| app.label == spec.label) {
            return Err(SimError::duplicate(format!("application on {}", device), spec.label));
        }
        entry.apps.push(spec);
        Ok(())
    }

    /// Mirror inbound traffic of `device` to the returned queue. In
    /// interrupt mode each packet waits for a release or drop decision.
    pub fn observe(&mut self, device: &str, interrupt: bool) -> Result<Receiver<Observation>> {
        let timeout = self.config.timing.listener_timeout();
        let entry = self.entry_mut(device)?;
        let (listener, rx) = TrafficListener::new(interrupt, timeout);
        entry.listener = Some(listener);
        Ok(rx)
    }

    pub fn add_channel(
        &mut self,
        kind: PortKind,
        a: &str,
        b: &str,
        length: f64,
    ) -> Result<ChannelId> {
        if a == b {
            return Err(SimError::configuration(
                format!("channel from {} to itself", a),
                Some("channels"),
            ));
        }
        if !(length.is_finite() && length >= 0.0) {
            return Err(SimError::configuration(
                format!("invalid channel length {}", length),
                Some("channels"),
            ));
        }
        let channel = Channel::new(kind, length, self.identity(a)?, self.identity(b)?);
        let id = channel.id();
        self.channels.push(channel);
        Ok(id)
    }

    fn incident(&self, kind: PortKind, label: &str) -> Vec<&Channel> {
        self.channels
            .iter()
            .filter(|c| c.kind() == kind && (c.left().label == label || c.right().label == label))
            .collect()
    }

    fn is_pass_through(&self, label: &str) -> bool {
        self.index
            .get(label)
            .map_or(false, |index| self.devices[*index].role == DeviceRole::PassThrough)
    }

    fn validate(&self) -> Result<()> {
        self.config
            .validate()
            .map_err(|e| SimError::configuration(e.to_string(), None))?;
        for entry in self.devices.iter().filter(|e| e.role == DeviceRole::PassThrough) {
            for kind in PortKind::ALL {
                let count = self.incident(kind, &entry.identity.label).len();
                if count != 0 && count != 2 {
                    return Err(SimError::configuration(
                        format!(
                            "pass-through device {} needs zero or two {} channels, has {}",
                            entry.identity, kind, count
                        ),
                        Some("channels"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Follow a pass-through chain entered through `channel` into `hop`,
    /// returning the first ordinary device at its far end
    fn far_endpoint(&self, channel: &Channel, hop: &str) -> Option<DeviceIdentity> {
        let mut via = channel.id();
        let mut current = hop.to_string();
        let mut visited = HashSet::new();
        while self.is_pass_through(&current) {
            if !visited.insert(current.clone()) {
                return None;
            }
            let next = self
                .incident(channel.kind(), &current)
                .into_iter()
                .find(|c| c.id() != via)?;
            via = next.id();
            current = next.peer_of(&current)?.label.clone();
        }
        self.identity(&current).ok()
    }

    pub fn build(mut self) -> Result<Simulation> {
        self.validate()?;
        let (kernel_tx, kernel_rx) = unbounded();
        let (sink, records) = ResultSink::new();

        let sockets: Vec<NetworkSocket> = self
            .devices
            .iter()
            .map(|entry| {
                let socket = NetworkSocket::new(
                    entry.identity.clone(),
                    entry.role,
                    &self.config,
                    entry.listener.clone(),
                );
                socket.set_kernel(kernel_tx.clone());
                socket
            })
            .collect();

        let mut topology = Topology::new();
        for entry in &self.devices {
            let pass_through = entry.role == DeviceRole::PassThrough;
            topology.add_device(entry.identity.label.clone(), pass_through);
        }

        for channel in &self.channels {
            let kind = channel.kind();
            let left = self.index[&channel.left().label];
            let right = self.index[&channel.right().label];
            let left_end = channel.end_for(channel.left(), sockets[right].packet_inbound(kind))?;
            let right_end = channel.end_for(channel.right(), sockets[left].packet_inbound(kind))?;
            let left_port = sockets[left].connect(left_end)?;
            let right_port = sockets[right].connect(right_end)?;
            topology.add_edge(
                kind,
                &channel.left().label,
                &channel.right().label,
                channel.length(),
            );

            for (local, port, peer) in [
                (left, left_port, channel.right()),
                (right, right_port, channel.left()),
            ] {
                if self.devices[local].role == DeviceRole::PassThrough
                    || !self.is_pass_through(&peer.label)
                {
                    continue;
                }
                if let Some(far) = self.far_endpoint(channel, &peer.label) {
                    debug!(
                        device = %self.devices[local].identity,
                        port = %port,
                        target = %far,
                        "Port targets far end of pass-through chain"
                    );
                    sockets[local].ports().write().set_target(port, far)?;
                }
            }
        }

        let mut active_devices = BTreeSet::new();
        let mut controller = MinerController::new(self.config.miner_count());
        for (entry, socket) in std::mem::take(&mut self.devices).into_iter().zip(sockets) {
            let device = Device::new(
                socket,
                entry.apps,
                kernel_tx.clone(),
                self.config.clone(),
                sink.clone(),
            )?;
            if device.has_workload() {
                active_devices.insert(device.label().to_string());
            }
            controller.place(device)?;
        }
        let placement = controller.placement().clone();
        info!(
            devices = placement.len(),
            channels = self.channels.len(),
            miners = controller.miner_count(),
            "Simulation built"
        );

        let backend = self.backend.take().unwrap_or_else(|| Box::new(BitBackend::new()));
        let kernel = Kernel::new(KernelParts {
            config: self.config,
            topology,
            backend,
            controller,
            active_devices,
            inbound: (kernel_tx.clone(), kernel_rx),
            records,
        });
        Ok(Simulation {
            kernel,
            placement,
            kernel_queue: kernel_tx,
        })
    }
}

/// A built simulation, ready to run
pub struct Simulation {
    kernel: Kernel,
    placement: BTreeMap<String, String>,
    kernel_queue: Sender<Message>,
}

impl Simulation {
    /// Device label → miner label
    pub fn placement(&self) -> &BTreeMap<String, String> {
        &self.placement
    }

    /// Kernel inbound queue, e.g. to inject `Terminate`
    pub fn kernel_queue(&self) -> Sender<Message> {
        self.kernel_queue.clone()
    }

    /// Run to completion on the calling thread
    pub fn run(self) -> Result<SimulationResult> {
        self.kernel.run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_device_rejected() {
        let mut builder = SimulationBuilder::new(SimulationConfig::default());
        builder.add_device("a", DeviceRole::Ordinary).unwrap();
        assert!(matches!(
            builder.add_device("a", DeviceRole::Ordinary),
            Err(SimError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_channel_needs_known_distinct_devices() {
        let mut builder = SimulationBuilder::new(SimulationConfig::default());
        builder.add_device("a", DeviceRole::Ordinary).unwrap();
        assert!(builder.add_channel(PortKind::Classic, "a", "a", 1.0).is_err());
        assert!(builder.add_channel(PortKind::Classic, "a", "zz", 1.0).is_err());
    }

    #[test]
    fn test_pass_through_with_one_channel_rejected() {
        let mut builder = SimulationBuilder::new(SimulationConfig::default());
        builder.add_device("a", DeviceRole::Ordinary).unwrap();
        builder.add_device("otg", DeviceRole::PassThrough).unwrap();
        builder.add_channel(PortKind::Quantum, "a", "otg", 1.0).unwrap();
        assert!(matches!(builder.build(), Err(SimError::Configuration { .. })));
    }

    #[test]
    fn test_pass_through_cannot_host_applications() {
        let mut builder = SimulationBuilder::new(SimulationConfig::default());
        builder.add_device("otg", DeviceRole::PassThrough).unwrap();
        assert!(builder
            .add_application("otg", ApplicationSpec::new("x", |_| Ok(())))
            .is_err());
    }

    #[test]
    fn test_endpoint_ports_target_far_side_of_chain() {
        let mut builder = SimulationBuilder::new(SimulationConfig::default());
        builder.add_device("a", DeviceRole::Ordinary).unwrap();
        builder.add_device("otg1", DeviceRole::PassThrough).unwrap();
        builder.add_device("otg2", DeviceRole::PassThrough).unwrap();
        let c = builder.add_device("c", DeviceRole::Ordinary).unwrap();
        builder.add_channel(PortKind::Quantum, "a", "otg1", 1.0).unwrap();
        builder.add_channel(PortKind::Quantum, "otg1", "otg2", 1.0).unwrap();
        builder.add_channel(PortKind::Quantum, "otg2", "c", 1.0).unwrap();

        let channel = builder.channels[0].clone();
        assert_eq!(builder.far_endpoint(&channel, "otg1"), Some(c));
    }

    #[test]
    fn test_balanced_placement() {
        let mut builder = SimulationBuilder::new(SimulationConfig {
            miners: 2,
            ..SimulationConfig::default()
        });
        for label in ["a", "b", "c", "d"] {
            builder.add_device(label, DeviceRole::Ordinary).unwrap();
        }
        let simulation = builder.build().unwrap();
        let mut per_miner: HashMap<&str, usize> = HashMap::new();
        for miner in simulation.placement().values() {
            *per_miner.entry(miner.as_str()).or_default() += 1;
        }
        assert_eq!(per_miner.get("miner-0"), Some(&2));
        assert_eq!(per_miner.get("miner-1"), Some(&2));
    }

    #[test]
    fn test_zero_miners_places_everything_on_one() {
        let mut builder = SimulationBuilder::new(SimulationConfig {
            miners: 0,
            ..SimulationConfig::default()
        });
        for label in ["a", "b", "c"] {
            builder.add_device(label, DeviceRole::Ordinary).unwrap();
        }
        let simulation = builder.build().unwrap();
        assert_eq!(simulation.placement().len(), 3);
        assert!(simulation.placement().values().all(|miner| miner == "miner-0"));
    }
}
