//! Actor Kinds and States
//!
//! Every actor kind declares the set of states it may occupy and which of
//! them are terminal. Transitions are validated by the actor kernel's
//! `StateHandler`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of actor (layer) taking part in the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorKind {
    Kernel,
    Miner,
    Device,
    Socket,
    Application,
    RoutingLayer,
    Backend,
}

/// Named actor state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorState {
    NotStarted,
    Running,
    Paused,
    MayEnd,
    Finished,
    Terminated,
    Stopped,
    // Socket states
    Down,
    Up,
    Over,
}

impl fmt::Display for ActorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl ActorKind {
    /// Legal state set for this actor kind
    pub fn states(self) -> &'static [ActorState] {
        use ActorState::*;
        match self {
            ActorKind::Kernel => &[NotStarted, Running, Finished, Stopped],
            ActorKind::Miner => &[NotStarted, Running, MayEnd, Stopped],
            ActorKind::Device => &[NotStarted, Running, MayEnd, Finished, Terminated, Stopped],
            ActorKind::Socket => &[Down, Up, Paused, Over],
            ActorKind::Application => &[NotStarted, Running, Finished, Terminated],
            ActorKind::RoutingLayer => &[NotStarted, Running, Stopped],
            ActorKind::Backend => &[NotStarted, Running, Stopped],
        }
    }

    /// Initial state for a freshly created actor
    pub fn initial_state(self) -> ActorState {
        match self {
            ActorKind::Socket => ActorState::Down,
            _ => ActorState::NotStarted,
        }
    }

    /// States after which the actor is frozen
    pub fn terminal_states(self) -> &'static [ActorState] {
        use ActorState::*;
        match self {
            ActorKind::Socket => &[Over],
            ActorKind::Application => &[Finished, Terminated],
            _ => &[Stopped],
        }
    }

    pub fn allows(self, state: ActorState) -> bool {
        self.states().contains(&state)
    }

    pub fn is_terminal(self, state: ActorState) -> bool {
        self.terminal_states().contains(&state)
    }
}
