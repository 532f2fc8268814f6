//! # netsim Kernel
//!
//! Top of the simulator: the kernel loop, miners hosting device shards,
//! devices with their applications, the topology used for route discovery
//! and the backend that executes qubit operations.
//!
//! ```text
//!                 Kernel ── Topology, Backend, result sink
//!                   │  ▲
//!        EndDevice  │  │ StateReport, MayEnd, ConnectionChanged
//!                   ▼  │
//!            Miner-0 … Miner-N
//!                   │  ▲
//!                   ▼  │
//!   Device ── Socket, RoutingLayer, Applications
//! ```
//!
//! Build a network with [`SimulationBuilder`], then [`Simulation::run`]
//! blocks until every device has ended and returns a [`SimulationResult`].

pub mod application;
pub mod backend;
pub mod builder;
pub mod controller;
pub mod device;
pub mod kernel;
pub mod miner;
pub mod topology;

pub use application::{AppFunction, ApplicationHandle, ApplicationManager, ApplicationSpec};
pub use backend::{Backend, BitBackend};
pub use builder::{Simulation, SimulationBuilder};
pub use controller::MinerController;
pub use device::{Device, HostedDevice};
pub use kernel::{Kernel, KernelParts, SimulationResult};
pub use miner::{Miner, RunningMiner};
pub use topology::Topology;

// Re-exports so a simulation can be described from this crate alone
pub use netsim_config::{load_config, HeartbeatMode, SimulationConfig};
pub use netsim_network::{DeviceRole, ListenerDecision, Observation};
pub use netsim_types::{exit_code, PortKind, PortRef};
