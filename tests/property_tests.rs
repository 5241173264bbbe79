use std::sync::Arc;

use meshgossip::gossip::GossipData;
use meshgossip::peer::{PeerName, PeerNameSet, PeerRegistry, Peers};
use meshgossip::topology::TopologyGossipData;
use proptest::prelude::*;

fn peers() -> Arc<dyn Peers> {
    Arc::new(PeerRegistry::new(PeerName::new(1), "prop"))
}

fn data(peers: &Arc<dyn Peers>, names: &[u64]) -> TopologyGossipData {
    let update: PeerNameSet = names.iter().map(|n| PeerName::new(*n)).collect();
    TopologyGossipData::new(peers.clone(), update)
}

fn names_of(merged: &dyn GossipData) -> PeerNameSet {
    merged
        .as_any()
        .downcast_ref::<TopologyGossipData>()
        .map(|d| d.update().clone())
        .unwrap_or_default()
}

proptest! {
    #[test]
    fn test_topology_merge_commutative_property(
        a in prop::collection::vec(0u64..64, 0..16),
        b in prop::collection::vec(0u64..64, 0..16)
    ) {
        let peers = peers();
        let (a, b) = (data(&peers, &a), data(&peers, &b));
        prop_assert_eq!(names_of(a.merge(&b).as_ref()), names_of(b.merge(&a).as_ref()));
    }

    #[test]
    fn test_topology_merge_idempotent_property(
        a in prop::collection::vec(0u64..64, 0..16)
    ) {
        let peers = peers();
        let a = data(&peers, &a);
        prop_assert_eq!(names_of(a.merge(&a).as_ref()), a.update().clone());
    }

    #[test]
    fn test_topology_merge_associative_property(
        a in prop::collection::vec(0u64..64, 0..8),
        b in prop::collection::vec(0u64..64, 0..8),
        c in prop::collection::vec(0u64..64, 0..8)
    ) {
        let peers = peers();
        let (a, b, c) = (data(&peers, &a), data(&peers, &b), data(&peers, &c));
        let left = a.merge(&b).merge(&c);
        let right = a.merge(b.merge(&c).as_ref());
        prop_assert_eq!(names_of(left.as_ref()), names_of(right.as_ref()));
    }

    #[test]
    fn test_topology_merge_keeps_both_sides_property(
        a in prop::collection::vec(0u64..64, 0..16),
        b in prop::collection::vec(0u64..64, 0..16)
    ) {
        let peers = peers();
        let (da, db) = (data(&peers, &a), data(&peers, &b));
        let merged = names_of(da.merge(&db).as_ref());
        prop_assert!(da.update().is_subset(&merged));
        prop_assert!(db.update().is_subset(&merged));
    }

    #[test]
    fn test_peer_name_display_parse_property(value in 0u64..(1 << 48)) {
        let name = PeerName::new(value);
        let parsed: PeerName = name.to_string().parse().unwrap();
        prop_assert_eq!(parsed, name);
    }
}
