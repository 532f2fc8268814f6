//! Simulation Error Types
//!
//! Structural misuse (unknown message kinds, duplicate labels, exhausted port
//! pools, illegal state transitions) is raised as `SimError`. Protocol
//! failures that a caller is expected to branch on travel as negative exit
//! codes instead, see [`crate::exit_code`].

use crate::identity::PortKind;
use crate::state::{ActorKind, ActorState};
use thiserror::Error;

/// Main simulation error type
#[derive(Error, Debug)]
pub enum SimError {
    /// A signal instance was emitted a second time
    #[error("Signal already emitted: {kind}")]
    AlreadyEmitted { kind: String },

    /// The receiving side of a queue is gone
    #[error("Queue closed: {queue}")]
    QueueClosed { queue: String },

    /// An actor received a message kind outside of its contract
    #[error("Unexpected message for {actor:?}: {message}")]
    UnexpectedMessage { actor: ActorKind, message: String },

    /// State change outside the actor's declared state set
    #[error("Illegal state transition for {actor:?}: {from:?} -> {to:?}")]
    IllegalTransition {
        actor: ActorKind,
        from: ActorState,
        to: ActorState,
    },

    /// Port pool exhausted
    #[error("No available {kind:?} port on {device}")]
    NoAvailablePort { device: String, kind: PortKind },

    /// Port lookup failed
    #[error("Port not found: {lookup}")]
    PortNotFound { lookup: String },

    /// Port exists but cannot carry traffic or accept the operation
    #[error("Port {port} unavailable: {reason}")]
    PortUnavailable { port: String, reason: String },

    /// Duplicate registration (application label, module, queue, device)
    #[error("Duplicate {what}: {name}")]
    Duplicate { what: String, name: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// A bounded wait expired
    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Backend collaborator failure
    #[error("Backend error: {message}")]
    Backend { message: String },

    /// OS thread could not be spawned
    #[error("Failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for simulation operations
pub type Result<T> = std::result::Result<T, SimError>;

impl SimError {
    /// Create a queue-closed error
    pub fn queue_closed(queue: impl Into<String>) -> Self {
        Self::QueueClosed {
            queue: queue.into(),
        }
    }

    /// Create an unexpected-message error
    pub fn unexpected(actor: ActorKind, message: impl Into<String>) -> Self {
        Self::UnexpectedMessage {
            actor,
            message: message.into(),
        }
    }

    /// Create a port-not-found error
    pub fn port_not_found(lookup: impl std::fmt::Display) -> Self {
        Self::PortNotFound {
            lookup: lookup.to_string(),
        }
    }

    /// Create a port-unavailable error
    pub fn port_unavailable(port: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::PortUnavailable {
            port: port.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a duplicate-registration error
    pub fn duplicate(what: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Duplicate {
            what: what.into(),
            name: name.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a backend error
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Whether this error is a recoverable protocol failure rather than misuse
    pub fn is_protocol_failure(&self) -> bool {
        matches!(
            self,
            Self::PortNotFound { .. }
                | Self::PortUnavailable { .. }
                | Self::Timeout { .. }
                | Self::QueueClosed { .. }
                | Self::Backend { .. }
        )
    }

    /// Exit code reported in a `Respond` when this error ends a request
    pub fn exit_code(&self) -> i32 {
        use crate::exit_code;
        match self {
            Self::PortNotFound { .. } | Self::NoAvailablePort { .. } => exit_code::NO_PORT,
            Self::PortUnavailable { .. } => exit_code::PORT_UNAVAILABLE,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::QueueClosed { .. } => exit_code::NOT_ACCEPTING,
            Self::Backend { .. } => exit_code::BACKEND_FAILURE,
            _ => exit_code::REJECTED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit_code;

    #[test]
    fn test_protocol_failures_map_to_negative_codes() {
        let err = SimError::port_unavailable("classic#0", "port is inactive");
        assert!(err.is_protocol_failure());
        assert_eq!(err.exit_code(), exit_code::PORT_UNAVAILABLE);
        assert!(err.exit_code() < 0);

        let err = SimError::timeout("find_route", 250);
        assert_eq!(err.exit_code(), exit_code::TIMEOUT);
        assert_eq!(err.to_string(), "Timeout: find_route exceeded 250ms");
    }

    #[test]
    fn test_misuse_is_not_protocol_failure() {
        let err = SimError::duplicate("application", "alice");
        assert!(!err.is_protocol_failure());
        assert_eq!(err.exit_code(), exit_code::REJECTED);
    }
}
