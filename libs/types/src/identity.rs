//! Identifiers
//!
//! Devices are addressed by label inside a simulation (labels are unique per
//! simulation) and carry a UUID for lookups that must survive relabeling.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique device identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(Uuid);

impl DeviceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device-{}", self.0.simple())
    }
}

/// Device identity: UUID plus human label
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub id: DeviceId,
    pub label: String,
}

impl DeviceIdentity {
    /// Create a fresh identity for the given label
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: DeviceId::new(),
            label: label.into(),
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Kind of port, channel and traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Classic,
    Quantum,
}

impl PortKind {
    pub const ALL: [PortKind; 2] = [PortKind::Classic, PortKind::Quantum];
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortKind::Classic => f.write_str("classic"),
            PortKind::Quantum => f.write_str("quantum"),
        }
    }
}

/// Port address on one device: kind plus pool index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortRef {
    pub kind: PortKind,
    pub index: usize,
}

impl PortRef {
    pub fn new(kind: PortKind, index: usize) -> Self {
        Self { kind, index }
    }

    pub fn classic(index: usize) -> Self {
        Self::new(PortKind::Classic, index)
    }

    pub fn quantum(index: usize) -> Self {
        Self::new(PortKind::Quantum, index)
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.index)
    }
}

/// Channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0.simple())
    }
}

/// Correlation identifier linking a Request to its Respond
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "corr-{}", self.0.simple())
    }
}

/// Opaque qubit handle issued by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QubitHandle(pub u64);
