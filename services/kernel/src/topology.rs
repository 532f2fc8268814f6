//! Network Topology
//!
//! The kernel's view of the physical graph, one edge set per port kind.
//! Edges are weighted by channel length. A heartbeat `DROP` marks an edge
//! down and a `RESTORE` brings it back; down edges are skipped by path
//! search. Pass-through devices stay on the physical path but are removed
//! from the routes handed to devices.

use netsim_types::PortKind;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Edge {
    length: f64,
    up: bool,
}

/// Undirected edge key, endpoints in label order
fn key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Frontier<'a> {
    cost: f64,
    node: &'a str,
}

impl Eq for Frontier<'_> {}

impl Ord for Frontier<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on cost, label order breaks ties deterministically
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(self.node))
    }
}

impl PartialOrd for Frontier<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct Topology {
    /// Device label → pass-through flag
    devices: BTreeMap<String, bool>,
    edges: HashMap<PortKind, BTreeMap<(String, String), Edge>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&mut self, label: impl Into<String>, pass_through: bool) {
        self.devices.insert(label.into(), pass_through);
    }

    pub fn contains(&self, label: &str) -> bool {
        self.devices.contains_key(label)
    }

    pub fn is_pass_through(&self, label: &str) -> bool {
        self.devices.get(label).copied().unwrap_or(false)
    }

    pub fn add_edge(&mut self, kind: PortKind, a: &str, b: &str, length: f64) {
        self.edges
            .entry(kind)
            .or_default()
            .insert(key(a, b), Edge { length, up: true });
    }

    fn set_up(&mut self, kind: PortKind, a: &str, b: &str, up: bool) -> bool {
        match self.edges.get_mut(&kind).and_then(|edges| edges.get_mut(&key(a, b))) {
            Some(edge) if edge.up != up => {
                edge.up = up;
                debug!(kind = %kind, a, b, up, "Topology edge changed");
                true
            }
            Some(_) => false,
            None => {
                trace!(kind = %kind, a, b, "Change for unknown edge ignored");
                false
            }
        }
    }

    /// Mark an edge down. Returns whether anything changed.
    pub fn remove_edge(&mut self, kind: PortKind, a: &str, b: &str) -> bool {
        self.set_up(kind, a, b, false)
    }

    pub fn restore_edge(&mut self, kind: PortKind, a: &str, b: &str) -> bool {
        self.set_up(kind, a, b, true)
    }

    pub fn is_up(&self, kind: PortKind, a: &str, b: &str) -> bool {
        self.edges
            .get(&kind)
            .and_then(|edges| edges.get(&key(a, b)))
            .map_or(false, |edge| edge.up)
    }

    fn neighbours<'a>(
        &'a self,
        kind: PortKind,
        node: &'a str,
    ) -> impl Iterator<Item = (&'a str, f64)> + 'a {
        self.edges
            .get(&kind)
            .into_iter()
            .flat_map(|edges| edges.iter())
            .filter(|(_, edge)| edge.up)
            .filter_map(move |((a, b), edge)| {
                if a == node {
                    Some((b.as_str(), edge.length))
                } else if b == node {
                    Some((a.as_str(), edge.length))
                } else {
                    None
                }
            })
    }

    /// Shortest physical path by total length, endpoints inclusive
    pub fn shortest_path(&self, kind: PortKind, from: &str, to: &str) -> Option<Vec<String>> {
        if !self.contains(from) || !self.contains(to) {
            return None;
        }
        if from == to {
            return Some(vec![from.to_string()]);
        }

        let mut best: HashMap<&str, f64> = HashMap::new();
        let mut previous: HashMap<&str, &str> = HashMap::new();
        let mut heap = BinaryHeap::new();
        best.insert(from, 0.0);
        heap.push(Frontier { cost: 0.0, node: from });

        while let Some(Frontier { cost, node }) = heap.pop() {
            if node == to {
                break;
            }
            if best.get(node).map_or(false, |known| cost > *known) {
                continue;
            }
            for (next, length) in self.neighbours(kind, node) {
                let candidate = cost + length;
                if best.get(next).map_or(true, |known| candidate < *known) {
                    best.insert(next, candidate);
                    previous.insert(next, node);
                    heap.push(Frontier {
                        cost: candidate,
                        node: next,
                    });
                }
            }
        }

        let mut path = vec![to.to_string()];
        let mut cursor = to;
        while cursor != from {
            cursor = *previous.get(cursor)?;
            path.push(cursor.to_string());
        }
        path.reverse();
        Some(path)
    }

    /// Route handed to devices: the shortest path without pass-through hops
    pub fn route(&self, kind: PortKind, from: &str, to: &str) -> Option<Vec<String>> {
        let path = self.shortest_path(kind, from, to)?;
        Some(
            path.into_iter()
                .filter(|label| label == from || label == to || !self.is_pass_through(label))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> Topology {
        let mut topology = Topology::new();
        for label in ["a", "b", "c"] {
            topology.add_device(label, false);
        }
        topology.add_edge(PortKind::Classic, "a", "b", 1.0);
        topology.add_edge(PortKind::Classic, "b", "c", 1.0);
        topology
    }

    #[test]
    fn test_route_through_middle_device() {
        let topology = line();
        assert_eq!(
            topology.route(PortKind::Classic, "a", "c"),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
        // Edges are per kind
        assert_eq!(topology.route(PortKind::Quantum, "a", "c"), None);
    }

    #[test]
    fn test_shorter_total_length_wins() {
        let mut topology = line();
        topology.add_device("d", false);
        topology.add_edge(PortKind::Classic, "a", "d", 0.5);
        topology.add_edge(PortKind::Classic, "d", "c", 0.5);
        assert_eq!(
            topology.route(PortKind::Classic, "a", "c"),
            Some(vec!["a".to_string(), "d".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn test_dropped_edge_breaks_route_until_restored() {
        let mut topology = line();
        assert!(topology.remove_edge(PortKind::Classic, "c", "b"));
        assert!(!topology.remove_edge(PortKind::Classic, "b", "c"));
        assert_eq!(topology.route(PortKind::Classic, "a", "c"), None);

        assert!(topology.restore_edge(PortKind::Classic, "b", "c"));
        assert!(topology.route(PortKind::Classic, "a", "c").is_some());
    }

    #[test]
    fn test_pass_through_removed_from_route() {
        let mut topology = Topology::new();
        topology.add_device("a", false);
        topology.add_device("otg", true);
        topology.add_device("c", false);
        topology.add_edge(PortKind::Quantum, "a", "otg", 2.0);
        topology.add_edge(PortKind::Quantum, "otg", "c", 2.0);

        assert_eq!(
            topology.shortest_path(PortKind::Quantum, "a", "c").map(|p| p.len()),
            Some(3)
        );
        assert_eq!(
            topology.route(PortKind::Quantum, "a", "c"),
            Some(vec!["a".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn test_unknown_device_has_no_route() {
        assert_eq!(line().route(PortKind::Classic, "a", "zz"), None);
    }
}
