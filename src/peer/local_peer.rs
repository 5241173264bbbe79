use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::{PeerName, PeerNameSet};
use crate::error::Result;
use crate::gossip::sender::GossipConnection;
use crate::transport::Connection;
use crate::transport_error;

/// This node, and the set of connections it currently holds
pub struct LocalPeer {
    pub name: PeerName,
    pub nickname: String,
    connections: RwLock<IndexMap<PeerName, Arc<GossipConnection>>>,
}

impl std::fmt::Debug for LocalPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPeer")
            .field("name", &self.name)
            .field("nickname", &self.nickname)
            .field("connections", &self.connection_count())
            .finish()
    }
}

impl LocalPeer {
    pub fn new(name: PeerName, nickname: &str) -> Self {
        Self {
            name,
            nickname: nickname.to_string(),
            connections: RwLock::new(IndexMap::new()),
        }
    }

    /// Track a newly established connection. At most one per remote peer.
    pub fn add_connection(&self, conn: Arc<dyn Connection>) -> Result<Arc<GossipConnection>> {
        let remote = conn.remote_name();
        if remote == self.name {
            return Err(transport_error!("refusing connection to ourself ({})", remote));
        }
        let mut connections = self.connections.write();
        if connections.contains_key(&remote) {
            return Err(transport_error!("multiple connections to {} added", remote));
        }
        let gossip_conn = Arc::new(GossipConnection::new(conn));
        connections.insert(remote, gossip_conn.clone());
        Ok(gossip_conn)
    }

    pub fn remove_connection(&self, remote: &PeerName) -> Option<Arc<GossipConnection>> {
        self.connections.write().shift_remove(remote)
    }

    pub fn connection_to(&self, remote: &PeerName) -> Option<Arc<GossipConnection>> {
        self.connections.read().get(remote).cloned()
    }

    /// Connections to those of `names` we are actually connected to
    pub fn connections_to(&self, names: &[PeerName]) -> Vec<Arc<GossipConnection>> {
        let connections = self.connections.read();
        names
            .iter()
            .filter_map(|name| connections.get(name).cloned())
            .collect()
    }

    pub fn connections(&self) -> Vec<Arc<GossipConnection>> {
        self.connections.read().values().cloned().collect()
    }

    pub fn connected_names(&self) -> PeerNameSet {
        self.connections.read().keys().copied().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_connected_to_addr(&self, addr: &str) -> bool {
        self.connections
            .read()
            .values()
            .any(|c| c.connection().remote_tcp_addr() == addr)
    }
}
