//! Small-world topology construction for a negotiation.

use std::collections::{BTreeSet, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Builds the neighbor graph of a negotiation: a ring over the agents
/// sorted by address, densified with seeded random extra edges.
///
/// Every produced graph is irreflexive and symmetric; the ring makes it
/// connected for two or more agents. A single agent gets an empty neighbor
/// set.
#[derive(Debug, Clone)]
pub struct TopologyManager {
    phi: f64,
    seed: Option<u64>,
}

impl TopologyManager {
    /// `phi` scales the number of random extra edges: at most
    /// `floor(n * phi)` symmetric pairs are drawn. `seed` fixes the draw.
    pub fn new(phi: f64, seed: Option<u64>) -> Self {
        assert!(phi >= 0.0, "phi must be non-negative");
        Self { phi, seed }
    }

    /// Build the neighbor map over agent addresses.
    pub fn build(&self, addrs: &[String]) -> HashMap<String, BTreeSet<String>> {
        let mut sorted: Vec<&String> = addrs.iter().collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut topology: HashMap<String, BTreeSet<String>> = sorted
            .iter()
            .map(|addr| ((*addr).clone(), BTreeSet::new()))
            .collect();

        let n = sorted.len();
        if n <= 1 {
            return topology;
        }

        for (i, addr) in sorted.iter().enumerate() {
            let left = sorted[(i + n - 1) % n];
            let right = sorted[(i + 1) % n];
            let peers = topology.entry((*addr).clone()).or_default();
            peers.insert(left.clone());
            peers.insert(right.clone());
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let extras = (n as f64 * self.phi).floor() as usize;
        for _ in 0..extras {
            let a = sorted[rng.gen_range(0..n)];
            let b = sorted[rng.gen_range(0..n)];
            if a == b {
                continue;
            }
            topology.entry(a.clone()).or_default().insert(b.clone());
            topology.entry(b.clone()).or_default().insert(a.clone());
        }

        topology
    }

    /// Render a topology as a canonical bidirectional edge list with agent
    /// names substituted for addresses. Each pair appears once, ordered by
    /// address within the pair, and the list is sorted.
    pub fn edges(
        topology: &HashMap<String, BTreeSet<String>>,
        names: &HashMap<String, String>,
    ) -> Vec<(String, String)> {
        let mut edges = BTreeSet::new();
        for (addr, peers) in topology {
            for peer in peers {
                let (first, second) = if addr < peer {
                    (addr, peer)
                } else {
                    (peer, addr)
                };
                let name_of = |a: &String| names.get(a).cloned().unwrap_or_else(|| a.clone());
                edges.insert((name_of(first), name_of(second)));
            }
        }
        edges.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn addrs(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("local/{i:04}")).collect()
    }

    fn is_connected(topology: &HashMap<String, BTreeSet<String>>) -> bool {
        let Some(start) = topology.keys().next() else {
            return true;
        };
        let mut seen = BTreeSet::from([start.clone()]);
        let mut queue = VecDeque::from([start.clone()]);
        while let Some(addr) = queue.pop_front() {
            for peer in &topology[&addr] {
                if seen.insert(peer.clone()) {
                    queue.push_back(peer.clone());
                }
            }
        }
        seen.len() == topology.len()
    }

    #[test]
    fn graphs_are_symmetric_and_irreflexive() {
        for n in [2, 3, 5, 17] {
            let topology = TopologyManager::new(1.0, Some(42)).build(&addrs(n));
            for (addr, peers) in &topology {
                assert!(!peers.contains(addr), "{addr} links to itself");
                for peer in peers {
                    assert!(
                        topology[peer].contains(addr),
                        "{addr} -> {peer} has no back edge"
                    );
                }
            }
        }
    }

    #[test]
    fn graphs_are_connected() {
        for n in [2, 3, 8, 31] {
            let topology = TopologyManager::new(0.0, None).build(&addrs(n));
            assert!(is_connected(&topology), "ring of {n} not connected");
        }
    }

    #[test]
    fn a_single_agent_has_no_neighbors() {
        let topology = TopologyManager::new(1.0, Some(7)).build(&addrs(1));
        assert_eq!(topology.len(), 1);
        assert!(topology.values().all(BTreeSet::is_empty));
    }

    #[test]
    fn two_agents_link_each_other_exactly_once() {
        let topology = TopologyManager::new(0.0, None).build(&addrs(2));
        for (addr, peers) in &topology {
            assert_eq!(peers.len(), 1, "{addr} should have one neighbor");
        }
    }

    #[test]
    fn seeded_builds_are_reproducible() {
        let manager = TopologyManager::new(2.0, Some(1234));
        assert_eq!(manager.build(&addrs(9)), manager.build(&addrs(9)));
    }

    #[test]
    fn edge_lists_are_canonical() {
        let topology = TopologyManager::new(0.0, None).build(&addrs(3));
        let names: HashMap<String, String> = addrs(3)
            .into_iter()
            .enumerate()
            .map(|(i, addr)| (addr, format!("unit-{i}")))
            .collect();
        let edges = TopologyManager::edges(&topology, &names);
        assert_eq!(
            edges,
            vec![
                ("unit-0".into(), "unit-1".into()),
                ("unit-0".into(), "unit-2".into()),
                ("unit-1".into(), "unit-2".into()),
            ]
        );
    }
}
