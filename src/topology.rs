//! Topology gossip
//!
//! Membership changes travel over a reserved gossip channel. The payload is
//! whatever `Peers::encode_peers` produces for a set of names; receivers hand
//! it to `Peers::apply_update`, which decides what was actually new.
use std::any::Any;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::connection_maker::ConnectionMaker;
use crate::error::{GossipError, Result};
use crate::gossip::{GossipData, Gossiper};
use crate::peer::{PeerName, PeerNameSet, Peers};
use crate::routes::Routes;

pub const TOPOLOGY_CHANNEL: &str = "topology";

/// A set of peer names whose records should be sent
#[derive(Clone)]
pub struct TopologyGossipData {
    peers: Arc<dyn Peers>,
    update: PeerNameSet,
}

impl std::fmt::Debug for TopologyGossipData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyGossipData")
            .field("update", &self.update)
            .finish()
    }
}

impl TopologyGossipData {
    pub fn new(peers: Arc<dyn Peers>, update: PeerNameSet) -> Self {
        Self { peers, update }
    }

    pub fn update(&self) -> &PeerNameSet {
        &self.update
    }
}

impl GossipData for TopologyGossipData {
    fn encode(&self) -> Vec<Bytes> {
        match self.peers.encode_peers(&self.update) {
            Ok(bytes) => vec![bytes],
            Err(e) => {
                warn!("[gossip {}] failed encoding peers: {}", TOPOLOGY_CHANNEL, e);
                Vec::new()
            }
        }
    }

    fn merge(&self, other: &dyn GossipData) -> Box<dyn GossipData> {
        match other.as_any().downcast_ref::<TopologyGossipData>() {
            Some(other) => {
                let mut update = self.update.clone();
                update.extend(other.update.iter().copied());
                Box::new(TopologyGossipData::new(self.peers.clone(), update))
            }
            None => {
                warn!(
                    "[gossip {}] cannot merge foreign gossip data {:?}",
                    TOPOLOGY_CHANNEL, other
                );
                Box::new(self.clone())
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The gossiper behind the topology channel
pub struct TopologyReconciler {
    peers: Arc<dyn Peers>,
    routes: Arc<dyn Routes>,
    connection_maker: Arc<dyn ConnectionMaker>,
}

impl TopologyReconciler {
    pub fn new(
        peers: Arc<dyn Peers>,
        routes: Arc<dyn Routes>,
        connection_maker: Arc<dyn ConnectionMaker>,
    ) -> Self {
        Self {
            peers,
            routes,
            connection_maker,
        }
    }

    pub fn data(&self, update: PeerNameSet) -> TopologyGossipData {
        TopologyGossipData::new(self.peers.clone(), update)
    }

    /// Apply an update and react once if it changed anything
    fn apply_topology_update(&self, update: &[u8]) -> Result<(PeerNameSet, PeerNameSet)> {
        let (orig_update, new_update) = self.peers.apply_update(update)?;
        if !new_update.is_empty() {
            self.connection_maker.refresh();
            self.routes.recalculate();
        }
        Ok((orig_update, new_update))
    }
}

impl Gossiper for TopologyReconciler {
    fn gossip(&self) -> Option<Box<dyn GossipData>> {
        Some(Box::new(self.data(self.peers.names())))
    }

    fn on_gossip_unicast(&self, sender: PeerName, _msg: &[u8]) -> Result<()> {
        debug!("[gossip {}] rejecting unicast from {}", TOPOLOGY_CHANNEL, sender);
        Err(GossipError::UnexpectedUnicast(TOPOLOGY_CHANNEL.to_string()).into())
    }

    fn on_gossip_broadcast(
        &self,
        _sender: PeerName,
        update: &[u8],
    ) -> Result<Option<Box<dyn GossipData>>> {
        let (orig_update, new_update) = self.apply_topology_update(update)?;
        if new_update.is_empty() {
            return Ok(None);
        }
        Ok(Some(Box::new(self.data(orig_update))))
    }

    fn on_gossip(&self, update: &[u8]) -> Result<Option<Box<dyn GossipData>>> {
        let (_, new_update) = self.apply_topology_update(update)?;
        if new_update.is_empty() {
            return Ok(None);
        }
        Ok(Some(Box::new(self.data(new_update))))
    }
}
