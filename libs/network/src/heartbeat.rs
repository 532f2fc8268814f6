//! Heartbeat
//!
//! Liveness loop of one socket. Each cycle pings every active, connected
//! port and collects pongs for up to the configured window. A port that
//! stays silent is soft-unconnected and deactivated, which reports exactly
//! one `ConnectionChanged(DROP)`; an inactive port is not pinged again, so a
//! dead link is reported once.
//!
//! Periodic mode runs a cycle every interval ±jitter. Manual mode runs one
//! cycle per `RefreshHeartbeat` request.

use crate::port_manager::PortManager;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use netsim_actors::{Module, ModuleState};
use netsim_config::{HeartbeatConfig, HeartbeatMode};
use netsim_types::{
    exit_code, ActorKind, DeviceIdentity, HeartbeatReport, Packet, PortKind, PortRef, ReplyTo,
    RespondPayload,
};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

pub const MODULE_NAME: &str = "heartbeat";

/// Commands for the heartbeat thread
#[derive(Debug)]
pub enum HeartbeatControl {
    /// Run one cycle now, answering `reply` when present
    Refresh {
        reply: Option<ReplyTo>,
        asker: ActorKind,
        report: bool,
    },
    SetState(ModuleState),
    Stop,
}

/// Pong handed over by the socket's inbound pumps
#[derive(Debug, Clone)]
pub struct Pong {
    pub port: PortRef,
    pub responder: DeviceIdentity,
    pub sequence: u64,
    pub sent_at: Instant,
}

pub struct Heartbeat {
    owner: DeviceIdentity,
    ports: Arc<RwLock<PortManager>>,
    control: Receiver<HeartbeatControl>,
    pongs: Receiver<Pong>,
    config: HeartbeatConfig,
    state: ModuleState,
    sequence: u64,
    cycles: u64,
}

impl Heartbeat {
    pub fn new(
        owner: DeviceIdentity,
        ports: Arc<RwLock<PortManager>>,
        control: Receiver<HeartbeatControl>,
        pongs: Receiver<Pong>,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            owner,
            ports,
            control,
            pongs,
            config,
            state: ModuleState::Enabled,
            sequence: 0,
            cycles: 0,
        }
    }

    fn next_period(&self) -> Duration {
        let base = self.config.interval().as_secs_f64();
        let jitter = self.config.jitter.clamp(0.0, 0.99);
        let factor = if jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64(base * factor)
    }

    /// Run until stopped or the control queue disconnects
    pub fn run(mut self) -> u64 {
        debug!(device = %self.owner, mode = ?self.config.mode, "Heartbeat started");
        loop {
            let periodic =
                self.config.mode == HeartbeatMode::Periodic && self.state == ModuleState::Enabled;
            let command = if periodic {
                match self.control.recv_timeout(self.next_period()) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            } else {
                match self.control.recv() {
                    Ok(command) => Some(command),
                    Err(_) => break,
                }
            };

            match command {
                None => {
                    self.cycle();
                }
                Some(HeartbeatControl::Refresh {
                    reply,
                    asker,
                    report,
                }) => self.refresh(reply, asker, report),
                Some(HeartbeatControl::SetState(state)) => {
                    trace!(device = %self.owner, state = ?state, "Heartbeat state changed");
                    self.state = state;
                }
                Some(HeartbeatControl::Stop) => break,
            }
        }
        debug!(device = %self.owner, cycles = self.cycles, "Heartbeat stopped");
        self.cycles
    }

    fn refresh(&mut self, reply: Option<ReplyTo>, asker: ActorKind, report: bool) {
        let (code, payload) = if self.state == ModuleState::Enabled {
            let result = self.cycle();
            if report {
                (exit_code::OK, RespondPayload::Heartbeat(result))
            } else {
                (exit_code::OK, RespondPayload::Empty)
            }
        } else {
            (exit_code::NOT_ACCEPTING, RespondPayload::Empty)
        };
        if let Some(reply) = reply {
            if let Err(e) = reply.respond(ActorKind::Socket, asker, code, payload) {
                debug!(device = %self.owner, error = %e, "Heartbeat requester gone");
            }
        }
    }

    /// One ping / collect round
    pub fn cycle(&mut self) -> HeartbeatReport {
        let started = Instant::now();
        self.cycles += 1;

        let targets: Vec<PortRef> = {
            let ports = self.ports.read();
            PortKind::ALL
                .iter()
                .flat_map(|kind| ports.active_connected(*kind))
                .collect()
        };

        let mut pending: HashMap<u64, PortRef> = HashMap::new();
        let mut liveness: Vec<(PortRef, bool)> = Vec::with_capacity(targets.len());
        for port in &targets {
            self.sequence += 1;
            let ping = Packet::ping(port.kind, &self.owner, self.sequence);
            match self.ports.read().send(*port, ping) {
                Ok(_) => {
                    pending.insert(self.sequence, *port);
                }
                Err(e) => {
                    trace!(device = %self.owner, port = %port, error = %e, "Ping not sent");
                    liveness.push((*port, false));
                }
            }
        }

        let deadline = started + self.config.window();
        while !pending.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match self.pongs.recv_timeout(deadline - now) {
                Ok(pong) => {
                    // Late pongs from an earlier round are ignored
                    if pending.get(&pong.sequence) == Some(&pong.port) {
                        pending.remove(&pong.sequence);
                        let latency = pong.sent_at.elapsed() / 2;
                        self.ports
                            .write()
                            .learn_peer(pong.port, &pong.responder, Some(latency));
                        liveness.push((pong.port, true));
                    }
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        liveness.extend(pending.into_values().map(|port| (port, false)));
        let dead: Vec<PortRef> = liveness
            .iter()
            .filter(|(_, alive)| !alive)
            .map(|(port, _)| *port)
            .collect();
        if !dead.is_empty() {
            let mut ports = self.ports.write();
            for port in dead {
                warn!(device = %self.owner, port = %port, "No pong within window, dropping link");
                self.drop_link(&mut ports, port);
            }
        }

        liveness.sort_by_key(|(port, _)| *port);
        HeartbeatReport {
            liveness,
            elapsed: started.elapsed(),
        }
    }

    /// Soft-unconnect and deactivate a silent port. Returns false when
    /// either step failed; the failure is logged and the round goes on.
    fn drop_link(&self, ports: &mut PortManager, port: PortRef) -> bool {
        let mut clean = true;
        if let Err(e) = ports.unconnect(port, true) {
            warn!(device = %self.owner, port = %port, error = %e, "Failed to unconnect port");
            clean = false;
        }
        if let Err(e) = ports.deactivate(port) {
            warn!(device = %self.owner, port = %port, error = %e, "Failed to deactivate port");
            clean = false;
        }
        clean
    }
}

/// Socket-side handle, attached to the socket's module registry
#[derive(Debug)]
pub struct HeartbeatModule {
    control: Sender<HeartbeatControl>,
    state: ModuleState,
}

impl HeartbeatModule {
    pub fn new(control: Sender<HeartbeatControl>) -> Self {
        Self {
            control,
            state: ModuleState::Enabled,
        }
    }

    fn set(&mut self, state: ModuleState) -> bool {
        if self.state == state {
            return false;
        }
        self.state = state;
        if self.control.send(HeartbeatControl::SetState(state)).is_err() {
            info!("Heartbeat thread already gone");
        }
        true
    }
}

impl Module for HeartbeatModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn state(&self) -> ModuleState {
        self.state
    }

    fn enable(&mut self) -> bool {
        self.set(ModuleState::Enabled)
    }

    fn disable(&mut self) -> bool {
        self.set(ModuleState::Disabled)
    }

    fn pause(&mut self) -> bool {
        self.set(ModuleState::Paused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, Inbound};
    use crossbeam_channel::unbounded;
    use netsim_types::{LinkChange, Message, PacketBody, SignalKind};

    struct Fixture {
        heartbeat: Heartbeat,
        ports: Arc<RwLock<PortManager>>,
        port: PortRef,
        wire: Receiver<Inbound>,
        pong_tx: Sender<Pong>,
        kernel: Receiver<Message>,
        _control: Sender<HeartbeatControl>,
    }

    fn fixture() -> Fixture {
        let a = DeviceIdentity::new("a");
        let b = DeviceIdentity::new("b");
        let channel = Channel::new(PortKind::Classic, 1.0, a.clone(), b);
        let (wire_tx, wire) = unbounded();
        let (kernel_tx, kernel) = unbounded();
        let mut manager = PortManager::new(a.clone(), 1, 0);
        manager.set_kernel(kernel_tx);
        let port = manager.connect(channel.end_for(&a, wire_tx).unwrap()).unwrap();

        let ports = Arc::new(RwLock::new(manager));
        let (control_tx, control_rx) = unbounded();
        let (pong_tx, pong_rx) = unbounded();
        let config = HeartbeatConfig {
            mode: HeartbeatMode::Manual,
            interval_ms: 100,
            window_ms: 50,
            jitter: 0.0,
        };
        Fixture {
            heartbeat: Heartbeat::new(a, ports.clone(), control_rx, pong_rx, config),
            ports,
            port,
            wire,
            pong_tx,
            kernel,
            _control: control_tx,
        }
    }

    fn drops(kernel: &Receiver<Message>) -> usize {
        kernel
            .try_iter()
            .filter(|message| {
                let Message::Signal(signal) = message else {
                    return false;
                };
                matches!(
                    signal.kind(),
                    SignalKind::ConnectionChanged(change) if change.change == LinkChange::Drop
                )
            })
            .count()
    }

    #[test]
    fn test_silent_port_dropped_exactly_once() {
        let mut f = fixture();

        let report = f.heartbeat.cycle();
        assert_eq!(report.is_alive(f.port), Some(false));
        let slot = f.ports.read().port(f.port).cloned().unwrap();
        assert!(!slot.is_connected());
        assert!(!slot.is_active());

        // Inactive ports are not pinged again
        let report = f.heartbeat.cycle();
        assert!(report.liveness.is_empty());
        assert_eq!(drops(&f.kernel), 1);
    }

    #[test]
    fn test_pong_keeps_port_alive_and_records_latency() {
        let mut f = fixture();
        let pong_tx = f.pong_tx.clone();
        let wire = f.wire.clone();
        let port = f.port;
        let responder = thread_responder(wire, pong_tx, port);

        let report = f.heartbeat.cycle();
        assert_eq!(report.is_alive(f.port), Some(true));
        let slot = f.ports.read().port(f.port).cloned().unwrap();
        assert!(slot.is_usable());
        assert!(slot.latency().is_some());
        assert_eq!(drops(&f.kernel), 0);
        responder.join().unwrap();
    }

    fn thread_responder(
        wire: Receiver<Inbound>,
        pongs: Sender<Pong>,
        port: PortRef,
    ) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            let inbound = wire.recv_timeout(Duration::from_secs(1)).unwrap();
            match inbound.packet.body {
                PacketBody::Ping { sequence, sent_at, .. } => pongs
                    .send(Pong {
                        port,
                        responder: DeviceIdentity::new("b"),
                        sequence,
                        sent_at,
                    })
                    .unwrap(),
                other => panic!("expected ping, got {:?}", other),
            }
        })
    }

    #[test_log::test]
    fn test_drop_link_reports_unknown_port() {
        let f = fixture();
        let mut ports = f.ports.write();
        assert!(!f.heartbeat.drop_link(&mut ports, PortRef::classic(7)));
        assert!(f.heartbeat.drop_link(&mut ports, f.port));
        assert!(!ports.port(f.port).unwrap().is_active());
    }

    #[test]
    fn test_module_state_changes_once() {
        let (tx, rx) = unbounded();
        let mut module = HeartbeatModule::new(tx);
        assert!(!module.enable());
        assert!(module.pause());
        assert!(!module.pause());
        assert!(matches!(
            rx.try_recv().unwrap(),
            HeartbeatControl::SetState(ModuleState::Paused)
        ));
    }
}
