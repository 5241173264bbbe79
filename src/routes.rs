//! Forwarding decisions derived from mesh topology
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::peer::{PeerName, PeerRegistry};

/// Route computation consumed by gossip channels and the topology reconciler
pub trait Routes: Send + Sync {
    /// Recompute forwarding state after membership changed
    fn recalculate(&self);

    /// Next hop towards `dest`
    fn unicast_all(&self, dest: PeerName) -> Option<PeerName>;

    /// Neighbours that should receive a broadcast originating at `source`
    fn broadcast_all(&self, source: PeerName) -> Vec<PeerName>;

    /// A bounded random subset of neighbours, excluding `except`
    fn random_neighbours(&self, except: PeerName) -> Vec<PeerName>;
}

#[derive(Debug, Default)]
struct RouteTable {
    neighbours: Vec<PeerName>,
    unicast: HashMap<PeerName, PeerName>,
    broadcast: HashMap<PeerName, Vec<PeerName>>,
}

/// Shortest-path routes over the connection graph held by a `PeerRegistry`.
///
/// Links between two other peers count only when both ends announce them;
/// our own links are taken from our own record.
pub struct MeshRoutes {
    ourself: PeerName,
    peers: Arc<PeerRegistry>,
    single_hop_topology: bool,
    table: RwLock<RouteTable>,
}

impl std::fmt::Debug for MeshRoutes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshRoutes")
            .field("ourself", &self.ourself)
            .field("single_hop_topology", &self.single_hop_topology)
            .field("table", &*self.table.read())
            .finish()
    }
}

impl MeshRoutes {
    pub fn new(peers: Arc<PeerRegistry>, single_hop_topology: bool) -> Self {
        let routes = Self {
            ourself: peers.ourself(),
            peers,
            single_hop_topology,
            table: RwLock::new(RouteTable::default()),
        };
        routes.recalculate();
        routes
    }

    pub fn neighbours(&self) -> Vec<PeerName> {
        self.table.read().neighbours.clone()
    }

    fn adjacency(&self) -> HashMap<PeerName, BTreeSet<PeerName>> {
        let graph = self.peers.graph();
        let ours: BTreeSet<PeerName> = graph
            .get(&self.ourself)
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default();
        let mut adjacency: HashMap<PeerName, BTreeSet<PeerName>> = HashMap::new();
        for neighbour in &ours {
            adjacency.entry(self.ourself).or_default().insert(*neighbour);
            adjacency.entry(*neighbour).or_default().insert(self.ourself);
        }
        for (name, connections) in &graph {
            if *name == self.ourself {
                continue;
            }
            for other in connections {
                if *other == self.ourself {
                    continue;
                }
                let reciprocated = graph
                    .get(other)
                    .map(|c| c.contains(name))
                    .unwrap_or(false);
                if reciprocated {
                    adjacency.entry(*name).or_default().insert(*other);
                    adjacency.entry(*other).or_default().insert(*name);
                }
            }
        }
        adjacency
    }

    /// Breadth-first parents from `root`; neighbour order is by name
    fn bfs_parents(
        adjacency: &HashMap<PeerName, BTreeSet<PeerName>>,
        root: PeerName,
    ) -> HashMap<PeerName, PeerName> {
        let mut parents = HashMap::new();
        let mut queue = VecDeque::from([root]);
        parents.insert(root, root);
        while let Some(name) = queue.pop_front() {
            for next in adjacency.get(&name).into_iter().flatten() {
                if !parents.contains_key(next) {
                    parents.insert(*next, name);
                    queue.push_back(*next);
                }
            }
        }
        parents
    }
}

impl Routes for MeshRoutes {
    fn recalculate(&self) {
        let adjacency = self.adjacency();
        let neighbours: Vec<PeerName> = adjacency
            .get(&self.ourself)
            .map(|n| n.iter().copied().collect())
            .unwrap_or_default();

        let mut unicast = HashMap::new();
        if self.single_hop_topology {
            for n in &neighbours {
                unicast.insert(*n, *n);
            }
        } else {
            let parents = Self::bfs_parents(&adjacency, self.ourself);
            for dest in parents.keys() {
                if *dest == self.ourself {
                    continue;
                }
                // Walk back up the tree to the hop adjacent to us
                let mut hop = *dest;
                while let Some(parent) = parents.get(&hop) {
                    if *parent == self.ourself {
                        break;
                    }
                    hop = *parent;
                }
                unicast.insert(*dest, hop);
            }
        }

        let mut broadcast = HashMap::new();
        broadcast.insert(self.ourself, neighbours.clone());
        if !self.single_hop_topology {
            for source in adjacency.keys() {
                if *source == self.ourself {
                    continue;
                }
                let parents = Self::bfs_parents(&adjacency, *source);
                let hops: Vec<PeerName> = neighbours
                    .iter()
                    .filter(|n| parents.get(n) == Some(&self.ourself))
                    .copied()
                    .collect();
                broadcast.insert(*source, hops);
            }
        }

        debug!(
            "[{}] recalculated routes: {} neighbours, {} reachable",
            self.ourself,
            neighbours.len(),
            unicast.len()
        );
        *self.table.write() = RouteTable {
            neighbours,
            unicast,
            broadcast,
        };
    }

    fn unicast_all(&self, dest: PeerName) -> Option<PeerName> {
        self.table.read().unicast.get(&dest).copied()
    }

    fn broadcast_all(&self, source: PeerName) -> Vec<PeerName> {
        self.table
            .read()
            .broadcast
            .get(&source)
            .cloned()
            .unwrap_or_default()
    }

    fn random_neighbours(&self, except: PeerName) -> Vec<PeerName> {
        let candidates: Vec<PeerName> = self
            .table
            .read()
            .neighbours
            .iter()
            .filter(|n| **n != except)
            .copied()
            .collect();
        let count = random_subset_size(candidates.len());
        let mut rng = rand::thread_rng();
        candidates
            .choose_multiple(&mut rng, count)
            .copied()
            .collect()
    }
}

/// floor(log2(n)) + 1, capped at n
fn random_subset_size(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    ((usize::BITS - n.leading_zeros()) as usize).min(n)
}
