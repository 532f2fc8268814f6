//! # netsim Actor Kernel
//!
//! Building blocks every simulator actor is composed from. There is no actor
//! base class: an actor is a struct that embeds the pieces it needs and
//! implements [`ActorBehavior`] so [`run_actor`] can drive it.
//!
//! ```text
//! ┌──────────────────────────── actor thread ─────────────────────────────┐
//! │                                                                       │
//! │  inbound ──▶ run_actor ──▶ handle_signal / handle_request             │
//! │                 │                 │                                   │
//! │                 │                 ├── StateHandler ──StateReport──▶ parent
//! │                 │                 ├── QueueManager (named queues)     │
//! │                 │                 ├── ModuleRegistry (heartbeat, ...) │
//! │                 │                 └── Correlator ◀──Respond── peers   │
//! │                 └── on_idle (timeouts, sweeps)                        │
//! └───────────────────────────────────────────────────────────────────────┘
//!          ▲ LivenessGuard dropped on exit ──▶ Watcher (parent tier)
//! ```
//!
//! Threads are cancelled cooperatively through [`CancelToken`] plus a
//! `Terminate` signal; a thread that ignores both is detached by
//! [`join_or_detach`].

pub mod cancel;
pub mod correlation;
pub mod liveness;
pub mod modules;
pub mod registry;
pub mod state;
pub mod system;
pub mod watcher;

pub use cancel::CancelToken;
pub use correlation::Correlator;
pub use liveness::{liveness, Liveness, LivenessGuard};
pub use modules::{Module, ModuleRegistry, ModuleState};
pub use registry::{queue_names, QueueManager};
pub use state::StateHandler;
pub use system::{
    join_or_detach, run_actor, spawn_named, ActorBehavior, ActorStats, Flow, SupervisorDirective,
};
pub use watcher::{Watcher, WatcherHandle};
