//! # netsim Types
//!
//! Shared vocabulary for every netsim crate: device and channel identities,
//! actor kinds and their legal states, the Signal / Request / Respond message
//! protocol, traffic units and the error taxonomy.
//!
//! ## Message Flow
//!
//! ```text
//! Application ──Request──▶ Socket ──Forward──▶ RoutingLayer ──FindRoute──▶ Kernel
//!      ▲                     │                       │                       │
//!      └──────Respond────────┴───────Respond─────────┴───────Respond─────────┘
//! ```
//!
//! Signals flow upward (state reports, connection changes, end-of-work) and
//! downward (route cache flushes, terminate).

pub mod error;
pub mod identity;
pub mod messages;
pub mod packet;
pub mod results;
pub mod state;

pub use error::{Result, SimError};
pub use identity::{
    ChannelId, CorrelationId, DeviceId, DeviceIdentity, PortKind, PortRef, QubitHandle,
};
pub use messages::{
    exit_code, BackendCall, BackendReply, ConnectionChange, EndReason, HeartbeatReport, LinkChange,
    Message, PortSnapshot, ReplyTo, Request, RequestBody, Respond, RespondPayload, Signal,
    SignalKind,
};
pub use packet::{Packet, PacketBody};
pub use results::{ResultRecord, ResultSink};
pub use state::{ActorKind, ActorState};
