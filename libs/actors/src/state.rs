//! State Handler
//!
//! Enumerated state machine embedded in every actor. Only the owning actor
//! mutates it; a parent may configure a report target that receives a
//! `StateReport` signal on every successful transition.

use crossbeam_channel::Sender;
use netsim_types::{ActorKind, ActorState, Message, Result, Signal, SignalKind, SimError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Actor state machine with optional upward reporting
#[derive(Debug)]
pub struct StateHandler {
    kind: ActorKind,
    label: String,
    current: ActorState,
    report_target: Option<Sender<Message>>,
    history: Vec<(ActorState, Duration)>,
    created: Instant,
}

impl StateHandler {
    /// Create a handler in the kind's initial state
    pub fn new(kind: ActorKind, label: impl Into<String>) -> Self {
        let initial = kind.initial_state();
        Self {
            kind,
            label: label.into(),
            current: initial,
            report_target: None,
            history: vec![(initial, Duration::ZERO)],
            created: Instant::now(),
        }
    }

    pub fn with_report_target(mut self, target: Sender<Message>) -> Self {
        self.report_target = Some(target);
        self
    }

    pub fn set_report_target(&mut self, target: Option<Sender<Message>>) {
        self.report_target = target;
    }

    pub fn kind(&self) -> ActorKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn current(&self) -> ActorState {
        self.current
    }

    pub fn is(&self, state: ActorState) -> bool {
        self.current == state
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal(self.current)
    }

    /// Every state visited so far with its offset from creation
    pub fn history(&self) -> &[(ActorState, Duration)] {
        &self.history
    }

    /// Move to `new`. Returns false, changing nothing, when `new` is outside
    /// the kind's state set, equals the current state, or the handler is
    /// already frozen in a terminal state.
    pub fn change_state(&mut self, new: ActorState) -> bool {
        if !self.kind.allows(new) || new == self.current || self.is_terminal() {
            trace!(
                actor = ?self.kind,
                label = %self.label,
                from = %self.current,
                to = %new,
                "State change ignored"
            );
            return false;
        }

        debug!(
            actor = ?self.kind,
            label = %self.label,
            from = %self.current,
            to = %new,
            "State changed"
        );
        self.current = new;
        self.history.push((new, self.created.elapsed()));
        self.report();
        true
    }

    /// Like `change_state`, but an illegal target is raised as an error.
    /// Re-entering the current state is still a silent no-op.
    pub fn try_change_state(&mut self, new: ActorState) -> Result<bool> {
        if !self.kind.allows(new) || (self.is_terminal() && new != self.current) {
            return Err(SimError::IllegalTransition {
                actor: self.kind,
                from: self.current,
                to: new,
            });
        }
        Ok(self.change_state(new))
    }

    fn report(&self) {
        let Some(target) = &self.report_target else {
            return;
        };
        let kind = SignalKind::StateReport {
            actor: self.kind,
            label: self.label.clone(),
            state: self.current,
        };
        if let Err(e) = Signal::send(self.kind, kind, target) {
            // Parent already gone during teardown
            debug!(label = %self.label, error = %e, "State report not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_change_state_rejects_foreign_and_repeated_states() {
        let mut handler = StateHandler::new(ActorKind::Socket, "alice");
        assert_eq!(handler.current(), ActorState::Down);

        // Running is not a socket state
        assert!(!handler.change_state(ActorState::Running));
        assert!(handler.change_state(ActorState::Up));
        assert!(!handler.change_state(ActorState::Up));
        assert_eq!(handler.history().len(), 2);
    }

    #[test]
    fn test_terminal_state_is_frozen() {
        let mut handler = StateHandler::new(ActorKind::Application, "app");
        assert!(handler.change_state(ActorState::Running));
        assert!(handler.change_state(ActorState::Finished));
        assert!(handler.is_terminal());
        assert!(!handler.change_state(ActorState::Running));
        assert!(handler.try_change_state(ActorState::Running).is_err());
    }

    #[test]
    fn test_try_change_state_raises_for_illegal_target() {
        let mut handler = StateHandler::new(ActorKind::Miner, "miner-0");
        let err = handler.try_change_state(ActorState::Paused).unwrap_err();
        assert!(matches!(err, SimError::IllegalTransition { .. }));
        assert_eq!(handler.try_change_state(ActorState::Running).unwrap(), true);
        assert_eq!(handler.try_change_state(ActorState::Running).unwrap(), false);
    }

    #[test]
    fn test_reports_each_transition() {
        let (tx, rx) = unbounded();
        let mut handler = StateHandler::new(ActorKind::Device, "bob").with_report_target(tx);

        handler.change_state(ActorState::Running);
        handler.change_state(ActorState::Running);
        handler.change_state(ActorState::MayEnd);

        let states: Vec<_> = rx
            .try_iter()
            .map(|message| match message {
                Message::Signal(signal) => match signal.into_kind() {
                    SignalKind::StateReport { label, state, .. } => {
                        assert_eq!(label, "bob");
                        state
                    }
                    other => panic!("unexpected {:?}", other),
                },
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(states, vec![ActorState::Running, ActorState::MayEnd]);
    }
}
