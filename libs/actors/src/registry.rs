//! Queue Registry
//!
//! Named queues an actor knows about: its own inbound queue, the parent it
//! reports to, the kernel, sibling actors. Names are unique per actor.

use crossbeam_channel::Sender;
use netsim_types::{Message, Result, SimError};
use std::collections::HashMap;

/// Well-known queue names
pub mod queue_names {
    pub const INBOUND: &str = "inbound";
    pub const REPORT: &str = "report";
    pub const KERNEL: &str = "kernel";
    pub const SOCKET: &str = "socket";
    pub const ROUTING: &str = "routing";
    pub const DEVICE: &str = "device";
}

/// Named queue registry owned by one actor
#[derive(Debug, Clone, Default)]
pub struct QueueManager {
    owner: String,
    queues: HashMap<String, Sender<Message>>,
}

impl QueueManager {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            queues: HashMap::new(),
        }
    }

    /// Register a queue under a unique name
    pub fn register(&mut self, name: impl Into<String>, queue: Sender<Message>) -> Result<()> {
        let name = name.into();
        if self.queues.contains_key(&name) {
            return Err(SimError::duplicate(
                format!("queue on {}", self.owner),
                name,
            ));
        }
        tracing::trace!(owner = %self.owner, queue = %name, "Queue registered");
        self.queues.insert(name, queue);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Sender<Message>> {
        self.queues.get(name)
    }

    /// Lookup that treats a missing queue as a wiring error
    pub fn require(&self, name: &str) -> Result<&Sender<Message>> {
        self.queues.get(name).ok_or_else(|| {
            SimError::configuration(
                format!("{} has no queue named '{}'", self.owner, name),
                Some("queues"),
            )
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Sender<Message>> {
        self.queues.remove(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.queues.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_register_and_lookup() {
        let (tx, _rx) = unbounded();
        let mut queues = QueueManager::new("device alice");
        queues.register(queue_names::KERNEL, tx).unwrap();

        assert!(queues.contains(queue_names::KERNEL));
        assert!(queues.require(queue_names::KERNEL).is_ok());
        assert!(matches!(
            queues.require(queue_names::SOCKET),
            Err(SimError::Configuration { .. })
        ));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (tx, _rx) = unbounded();
        let mut queues = QueueManager::new("socket");
        queues.register("inbound", tx.clone()).unwrap();
        assert!(matches!(
            queues.register("inbound", tx),
            Err(SimError::Duplicate { .. })
        ));
        assert_eq!(queues.names(), vec!["inbound"]);
    }
}
