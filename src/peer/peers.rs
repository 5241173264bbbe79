//! Mesh membership
//!
//! The `Peers` trait is the narrow interface the router consumes;
//! `PeerRegistry` is the in-memory membership table shipped with the crate.
use std::collections::{HashMap, VecDeque};

use bincode::{Decode, Encode};
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{PeerName, PeerNameSet};
use crate::error::Result;
use crate::gossip::messages::{decode_value, encode_value};

/// Invoked once per peer pruned by garbage collection
pub type GcCallback = Box<dyn Fn(&PeerRecord) + Send + Sync>;

/// Membership state shared by the router, routes and connection maker.
///
/// Implementations synchronize internally; every method may be called
/// concurrently from several delivering tasks.
pub trait Peers: Send + Sync {
    /// Decode a wire update and merge it into local membership.
    /// Returns the names the sender sent and the names that were new to us.
    fn apply_update(&self, update: &[u8]) -> Result<(PeerNameSet, PeerNameSet)>;

    /// Serialize the named subset of peers
    fn encode_peers(&self, names: &PeerNameSet) -> Result<Bytes>;

    /// Full current membership
    fn names(&self) -> PeerNameSet;

    /// Record our own connection set; returns the names whose records changed
    fn update_local(&self, connections: PeerNameSet) -> PeerNameSet;

    /// Prune peers no longer reachable from us; returns the pruned names
    fn garbage_collect(&self) -> PeerNameSet;

    /// Register a callback run for every pruned peer
    fn on_gc(&self, callback: GcCallback);
}

/// What the mesh knows about one peer
#[derive(Clone, Debug, PartialEq, Eq, Decode, Encode, Serialize, Deserialize)]
pub struct PeerRecord {
    pub name: PeerName,
    pub nickname: String,
    pub version: u64,
    pub connections: Vec<PeerName>,
}

impl PeerRecord {
    pub fn new(name: PeerName, nickname: &str) -> Self {
        Self {
            name,
            nickname: nickname.to_string(),
            version: 1,
            connections: Vec::new(),
        }
    }
}

pub struct PeerRegistry {
    ourself: PeerName,
    records: RwLock<HashMap<PeerName, PeerRecord>>,
    gc_callbacks: RwLock<Vec<GcCallback>>,
}

impl std::fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("ourself", &self.ourself)
            .field("peer_count", &self.records.read().len())
            .finish()
    }
}

impl PeerRegistry {
    pub fn new(ourself: PeerName, nickname: &str) -> Self {
        let mut records = HashMap::new();
        records.insert(ourself, PeerRecord::new(ourself, nickname));
        Self {
            ourself,
            records: RwLock::new(records),
            gc_callbacks: RwLock::new(Vec::new()),
        }
    }

    pub fn ourself(&self) -> PeerName {
        self.ourself
    }

    pub fn get(&self, name: &PeerName) -> Option<PeerRecord> {
        self.records.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Snapshot of every record, ordered by name
    pub fn records(&self) -> Vec<PeerRecord> {
        let mut records: Vec<PeerRecord> = self.records.read().values().cloned().collect();
        records.sort_by_key(|r| r.name);
        records
    }

    /// Directed adjacency as announced by each peer
    pub fn graph(&self) -> HashMap<PeerName, Vec<PeerName>> {
        self.records
            .read()
            .values()
            .map(|r| (r.name, r.connections.clone()))
            .collect()
    }

    fn reachable(records: &HashMap<PeerName, PeerRecord>, from: PeerName) -> PeerNameSet {
        // Links announced by either end count, except that only our own
        // record speaks for our links
        let mut adjacency: HashMap<PeerName, Vec<PeerName>> = HashMap::new();
        for record in records.values() {
            for conn in &record.connections {
                if record.name != from && *conn == from {
                    continue;
                }
                adjacency.entry(record.name).or_default().push(*conn);
                adjacency.entry(*conn).or_default().push(record.name);
            }
        }
        let mut seen = PeerNameSet::new();
        let mut queue = VecDeque::from([from]);
        seen.insert(from);
        while let Some(name) = queue.pop_front() {
            for next in adjacency.get(&name).into_iter().flatten() {
                if seen.insert(*next) {
                    queue.push_back(*next);
                }
            }
        }
        seen
    }
}

impl Peers for PeerRegistry {
    fn apply_update(&self, update: &[u8]) -> Result<(PeerNameSet, PeerNameSet)> {
        let (decoded, _): (Vec<PeerRecord>, usize) = decode_value(update)?;
        let orig_update: PeerNameSet = decoded.iter().map(|r| r.name).collect();
        let mut new_update = PeerNameSet::new();
        {
            let mut records = self.records.write();
            for incoming in decoded {
                if incoming.name == self.ourself {
                    // Someone holds a newer story about us; out-version it
                    if let Some(ours) = records.get_mut(&self.ourself) {
                        if incoming.version >= ours.version && incoming != *ours {
                            ours.version = incoming.version + 1;
                            new_update.insert(self.ourself);
                        }
                    }
                    continue;
                }
                match records.get(&incoming.name) {
                    Some(known) if known.version >= incoming.version => {}
                    _ => {
                        new_update.insert(incoming.name);
                        records.insert(incoming.name, incoming);
                    }
                }
            }
        }
        if !new_update.is_empty() {
            for removed in self.garbage_collect() {
                new_update.remove(&removed);
            }
        }
        debug!(
            "applied topology update: {} sent, {} new",
            orig_update.len(),
            new_update.len()
        );
        Ok((orig_update, new_update))
    }

    fn encode_peers(&self, names: &PeerNameSet) -> Result<Bytes> {
        let selected: Vec<PeerRecord> = {
            let records = self.records.read();
            names.iter().filter_map(|n| records.get(n).cloned()).collect()
        };
        Ok(Bytes::from(encode_value(&selected)?))
    }

    fn names(&self) -> PeerNameSet {
        self.records.read().keys().copied().collect()
    }

    fn update_local(&self, connections: PeerNameSet) -> PeerNameSet {
        let mut records = self.records.write();
        let mut changed = PeerNameSet::new();
        if let Some(ours) = records.get_mut(&self.ourself) {
            let connections: Vec<PeerName> = connections.into_iter().collect();
            if ours.connections != connections {
                ours.connections = connections;
                ours.version += 1;
                changed.insert(self.ourself);
            }
        }
        changed
    }

    fn garbage_collect(&self) -> PeerNameSet {
        let removed: Vec<PeerRecord> = {
            let mut records = self.records.write();
            let reachable = Self::reachable(&records, self.ourself);
            let unreachable: Vec<PeerName> = records
                .keys()
                .filter(|name| !reachable.contains(name))
                .copied()
                .collect();
            unreachable
                .iter()
                .filter_map(|name| records.remove(name))
                .collect()
        };
        let callbacks = self.gc_callbacks.read();
        for record in &removed {
            for callback in callbacks.iter() {
                callback(record);
            }
        }
        removed.into_iter().map(|r| r.name).collect()
    }

    fn on_gc(&self, callback: GcCallback) {
        self.gc_callbacks.write().push(callback);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn name(n: u64) -> PeerName {
        PeerName::new(n)
    }

    fn encode(records: &[PeerRecord]) -> Vec<u8> {
        encode_value(&records.to_vec()).unwrap()
    }

    fn record(n: u64, version: u64, connections: &[u64]) -> PeerRecord {
        PeerRecord {
            name: name(n),
            nickname: format!("peer-{}", n),
            version,
            connections: connections.iter().map(|c| name(*c)).collect(),
        }
    }

    #[test]
    fn test_new_registry_knows_only_ourself() {
        let peers = PeerRegistry::new(name(1), "one");
        assert_eq!(peers.names(), PeerNameSet::from([name(1)]));
        assert_eq!(peers.get(&name(1)).unwrap().nickname, "one");
    }

    #[test]
    fn test_apply_update_reports_original_and_new() {
        let peers = PeerRegistry::new(name(1), "one");
        peers.update_local(PeerNameSet::from([name(2)]));
        let update = encode(&[record(2, 1, &[1]), record(3, 1, &[2])]);

        let (orig, new) = peers.apply_update(&update).unwrap();
        assert_eq!(orig, PeerNameSet::from([name(2), name(3)]));
        assert_eq!(new, PeerNameSet::from([name(2), name(3)]));

        // Same update again is entirely redundant
        let (orig, new) = peers.apply_update(&update).unwrap();
        assert_eq!(orig.len(), 2);
        assert!(new.is_empty());
    }

    #[test]
    fn test_apply_update_keeps_newer_versions() {
        let peers = PeerRegistry::new(name(1), "one");
        peers.update_local(PeerNameSet::from([name(2)]));
        peers.apply_update(&encode(&[record(2, 5, &[1])])).unwrap();

        let (_, new) = peers.apply_update(&encode(&[record(2, 4, &[1, 3])])).unwrap();
        assert!(new.is_empty());
        assert_eq!(peers.get(&name(2)).unwrap().version, 5);

        let (_, new) = peers.apply_update(&encode(&[record(2, 6, &[1])])).unwrap();
        assert_eq!(new, PeerNameSet::from([name(2)]));
    }

    #[test]
    fn test_apply_update_rejects_garbage() {
        let peers = PeerRegistry::new(name(1), "one");
        assert!(peers.apply_update(&[0xff, 0xff, 0xff]).is_err());
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn test_stale_record_about_ourself_bumps_our_version() {
        let peers = PeerRegistry::new(name(1), "one");
        let (_, new) = peers.apply_update(&encode(&[record(1, 7, &[9])])).unwrap();
        assert_eq!(new, PeerNameSet::from([name(1)]));
        let ours = peers.get(&name(1)).unwrap();
        assert_eq!(ours.version, 8);
        assert!(ours.connections.is_empty());
    }

    #[test]
    fn test_update_local_only_changes_on_difference() {
        let peers = PeerRegistry::new(name(1), "one");
        let changed = peers.update_local(PeerNameSet::from([name(2)]));
        assert_eq!(changed, PeerNameSet::from([name(1)]));
        assert_eq!(peers.get(&name(1)).unwrap().version, 2);

        assert!(peers.update_local(PeerNameSet::from([name(2)])).is_empty());
        assert_eq!(peers.get(&name(1)).unwrap().version, 2);
    }

    #[test]
    fn test_unreachable_peers_are_collected() {
        let peers = PeerRegistry::new(name(1), "one");
        peers.update_local(PeerNameSet::from([name(2)]));
        let pruned = Arc::new(AtomicUsize::new(0));
        let counter = pruned.clone();
        peers.on_gc(Box::new(move |_: &PeerRecord| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        // 2 is linked to us and 3 hangs off 2; 4 floats alone and is pruned straight away
        let (_, new) = peers
            .apply_update(&encode(&[
                record(2, 1, &[1]),
                record(3, 1, &[2]),
                record(4, 1, &[]),
            ]))
            .unwrap();
        assert_eq!(new, PeerNameSet::from([name(2), name(3)]));
        assert_eq!(pruned.load(Ordering::SeqCst), 1);

        // Once we drop our link, 2 claiming a link to us is not enough
        peers.update_local(PeerNameSet::new());
        let removed = peers.garbage_collect();
        assert_eq!(removed, PeerNameSet::from([name(2), name(3)]));
        assert_eq!(peers.names(), PeerNameSet::from([name(1)]));
        assert_eq!(pruned.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_encode_peers_skips_unknown_names() {
        let peers = PeerRegistry::new(name(1), "one");
        let bytes = peers
            .encode_peers(&PeerNameSet::from([name(1), name(42)]))
            .unwrap();
        let (decoded, _): (Vec<PeerRecord>, usize) = decode_value(&bytes).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].name, name(1));
    }
}
