//! A named gossip channel and its relay logic
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use super::messages::{decode_unicast_dest, make_unicast_msg, ProtocolMsg, ProtocolTag};
use super::sender::GossipConnection;
use super::{GossipData, Gossiper};
use crate::error::{GossipError, Result};
use crate::peer::{LocalPeer, PeerName};
use crate::routes::Routes;

pub struct GossipChannel {
    name: String,
    ourself: Arc<LocalPeer>,
    routes: Arc<dyn Routes>,
    gossiper: Arc<dyn Gossiper>,
}

impl std::fmt::Debug for GossipChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GossipChannel")
            .field("name", &self.name)
            .field("ourself", &self.ourself.name)
            .finish()
    }
}

impl GossipChannel {
    pub fn new(
        name: &str,
        ourself: Arc<LocalPeer>,
        routes: Arc<dyn Routes>,
        gossiper: Arc<dyn Gossiper>,
    ) -> Self {
        Self {
            name: name.to_string(),
            ourself,
            routes,
            gossiper,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gossiper(&self) -> &Arc<dyn Gossiper> {
        &self.gossiper
    }

    /// Handle a unicast body (destination onwards). `payload` is the whole
    /// received message, forwarded unchanged when we are not the destination.
    pub async fn deliver_unicast(&self, src: PeerName, payload: &[u8], rest: &[u8]) -> Result<()> {
        let (dest, msg) = decode_unicast_dest(rest)?;
        if dest == self.ourself.name {
            return self.gossiper.on_gossip_unicast(src, msg);
        }
        if let Err(e) = self
            .relay_unicast(dest, Bytes::copy_from_slice(payload))
            .await
        {
            warn!("[gossip {}] {}", self.name, e);
        }
        Ok(())
    }

    /// Handle a broadcast originating at `src`, relaying whatever the
    /// gossiper hands back along the source's broadcast tree
    pub fn deliver_broadcast(&self, src: PeerName, update: &[u8]) -> Result<()> {
        if let Some(data) = self.gossiper.on_gossip_broadcast(src, update)? {
            self.relay_broadcast(src, Arc::from(data));
        }
        Ok(())
    }

    /// Handle merge gossip relayed by `src`; only what was new to us moves on
    pub fn deliver(&self, src: PeerName, update: &[u8]) -> Result<()> {
        if let Some(data) = self.gossiper.on_gossip(update)? {
            self.relay(src, Arc::from(data));
        }
        Ok(())
    }

    /// Push data to a random subset of our neighbours
    pub fn send(&self, data: Arc<dyn GossipData>) {
        self.relay(self.ourself.name, data);
    }

    /// Push data down a single connection
    pub fn send_down(&self, conn: &GossipConnection, data: Arc<dyn GossipData>) {
        conn.senders().sender(&self.name, self.ourself.name).send(data);
    }

    pub async fn gossip_unicast(&self, dest: PeerName, msg: &[u8]) -> Result<()> {
        let unicast = make_unicast_msg(&self.name, self.ourself.name, dest, msg)?;
        self.relay_unicast(dest, unicast.payload).await
    }

    pub fn gossip_broadcast(&self, data: Arc<dyn GossipData>) {
        self.relay_broadcast(self.ourself.name, data);
    }

    pub fn gossip_neighbour_subset(&self, data: Arc<dyn GossipData>) {
        self.relay(self.ourself.name, data);
    }

    fn relay(&self, src: PeerName, data: Arc<dyn GossipData>) {
        let targets = self.routes.random_neighbours(src);
        for conn in self.ourself.connections_to(&targets) {
            self.send_down(&conn, data.clone());
        }
    }

    fn relay_broadcast(&self, src: PeerName, data: Arc<dyn GossipData>) {
        let hops = self.routes.broadcast_all(src);
        if hops.is_empty() {
            return;
        }
        for conn in self.ourself.connections_to(&hops) {
            conn.senders()
                .sender(&self.name, self.ourself.name)
                .broadcast(src, data.clone());
        }
    }

    async fn relay_unicast(&self, dest: PeerName, payload: Bytes) -> Result<()> {
        let hop = self
            .routes
            .unicast_all(dest)
            .ok_or(GossipError::UnknownRelay(dest))?;
        let conn = self
            .ourself
            .connection_to(&hop)
            .ok_or(GossipError::NoConnection(hop))?;
        debug!("[gossip {}] relaying unicast for {} via {}", self.name, dest, hop);
        conn.connection()
            .send_protocol_msg(ProtocolMsg::new(ProtocolTag::GossipUnicast, payload))
            .await
    }
}
