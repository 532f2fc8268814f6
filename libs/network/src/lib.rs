//! # netsim Network
//!
//! Everything a device needs to exchange traffic: the port and channel
//! model, the per-device [`NetworkSocket`] with its heartbeat and optional
//! traffic listener, and the [`RoutingLayer`] that resolves multi-hop
//! routes through the kernel.
//!
//! ```text
//!  Application ──Send──▶ NetworkSocket ──direct port──▶ ChannelEnd ──▶ peer socket
//!                             │
//!                             └──Forward──▶ RoutingLayer ──FindRoute──▶ Kernel
//!                                               │
//!                                               └──Relay──▶ NetworkSocket
//! ```
//!
//! Ports of one socket live in a [`PortManager`] behind a `RwLock`, shared
//! by the socket's request loop, its two inbound pumps and its heartbeat.

pub mod channel;
pub mod heartbeat;
pub mod listener;
pub mod port;
pub mod port_manager;
pub mod routing;
pub mod socket;

pub use channel::{Channel, ChannelEnd, Inbound};
pub use heartbeat::{Heartbeat, HeartbeatControl, HeartbeatModule, Pong};
pub use listener::{ListenerDecision, Observation, TrafficListener};
pub use port::Port;
pub use port_manager::PortManager;
pub use routing::{RoutingLayer, RoutingStats};
pub use socket::{DeviceRole, NetworkSocket, SocketHandle, TrafficSnapshot};
