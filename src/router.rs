//! The mesh router
//!
//! Owns the listening socket, the registry of gossip channels and the
//! topology channel. Membership, routing and outbound dialing are supplied
//! as collaborators so that each can be swapped out independently.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::connection_maker::{ConnectionMaker, TcpConnectionMaker};
use crate::error::{GossipError, Result};
use crate::gossip::sender::GossipConnection;
use crate::gossip::{GossipChannel, GossipHeader, Gossiper, GossiperMaker, ProtocolTag, SurrogateGossiper};
use crate::overlay::{NullOverlay, Overlay};
use crate::peer::{LocalPeer, PeerName, PeerNameSet, PeerRecord, PeerRegistry, Peers};
use crate::routes::{MeshRoutes, Routes};
use crate::settings::{self, Config};
use crate::status::{ConnectionStatus, Status};
use crate::token_bucket::TokenBucket;
use crate::topology::{TopologyReconciler, TOPOLOGY_CHANNEL};
use crate::transport::{Connection, ConnectionBootstrap, RemoteConnection, TcpBootstrap};
use crate::{config_error, transport_error};

/// Collaborators a router is assembled from
pub struct RouterParts {
    pub ourself: Arc<LocalPeer>,
    pub peers: Arc<dyn Peers>,
    pub routes: Arc<dyn Routes>,
    pub connection_maker: Arc<dyn ConnectionMaker>,
    pub overlay: Arc<dyn Overlay>,
    pub bootstrap: Arc<dyn ConnectionBootstrap>,
    pub gossiper_maker: Option<Arc<dyn GossiperMaker>>,
}

impl RouterParts {
    /// In-memory membership, shortest-path routes, TCP everywhere else
    pub fn new(config: &Config, name: PeerName, nickname: &str) -> Self {
        let registry = Arc::new(PeerRegistry::new(name, nickname));
        let routes = Arc::new(MeshRoutes::new(registry.clone(), config.single_hop_topology));
        Self {
            ourself: Arc::new(LocalPeer::new(name, nickname)),
            peers: registry,
            routes,
            connection_maker: Arc::new(TcpConnectionMaker::new(Vec::new(), config.peer_discovery)),
            overlay: Arc::new(NullOverlay),
            bootstrap: Arc::new(TcpBootstrap),
            gossiper_maker: None,
        }
    }

    /// Replacing membership usually means replacing routes too, since
    /// the default routes read the default registry
    pub fn with_peers(mut self, peers: Arc<dyn Peers>) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_routes(mut self, routes: Arc<dyn Routes>) -> Self {
        self.routes = routes;
        self
    }

    pub fn with_connection_maker(mut self, connection_maker: Arc<dyn ConnectionMaker>) -> Self {
        self.connection_maker = connection_maker;
        self
    }

    pub fn with_overlay(mut self, overlay: Arc<dyn Overlay>) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: Arc<dyn ConnectionBootstrap>) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn with_gossiper_maker(mut self, gossiper_maker: Arc<dyn GossiperMaker>) -> Self {
        self.gossiper_maker = Some(gossiper_maker);
        self
    }
}

pub struct Router {
    pub config: Config,
    pub ourself: Arc<LocalPeer>,
    pub peers: Arc<dyn Peers>,
    pub routes: Arc<dyn Routes>,
    pub connection_maker: Arc<dyn ConnectionMaker>,
    overlay: Arc<dyn Overlay>,
    bootstrap: Arc<dyn ConnectionBootstrap>,
    gossiper_maker: Option<Arc<dyn GossiperMaker>>,
    gossip_channels: RwLock<HashMap<String, Arc<GossipChannel>>>,
    topology: Arc<TopologyReconciler>,
    topology_gossip: Arc<GossipChannel>,
    local_addr: Mutex<Option<SocketAddr>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("ourself", &self.ourself)
            .field("config", &self.config)
            .field("channels", &self.gossip_channels.read().len())
            .finish()
    }
}

impl Router {
    pub fn new(config: Config, parts: RouterParts) -> Result<Arc<Self>> {
        if config.conn_limit == 0 {
            return Err(config_error!("connection limit must be at least 1"));
        }
        if config.gossip_interval().is_zero() {
            return Err(config_error!("gossip interval must be non-zero"));
        }
        let RouterParts {
            ourself,
            peers,
            routes,
            connection_maker,
            overlay,
            bootstrap,
            gossiper_maker,
        } = parts;

        let name = ourself.name;
        peers.on_gc(Box::new(move |peer: &PeerRecord| {
            info!("[{}] Removed unreachable peer {}", name, peer.name);
        }));

        let topology = Arc::new(TopologyReconciler::new(
            peers.clone(),
            routes.clone(),
            connection_maker.clone(),
        ));
        let topology_gossip = Arc::new(GossipChannel::new(
            TOPOLOGY_CHANNEL,
            ourself.clone(),
            routes.clone(),
            topology.clone(),
        ));
        let mut gossip_channels = HashMap::new();
        gossip_channels.insert(TOPOLOGY_CHANNEL.to_string(), topology_gossip.clone());

        Ok(Arc::new(Self {
            config,
            ourself,
            peers,
            routes,
            connection_maker,
            overlay,
            bootstrap,
            gossiper_maker,
            gossip_channels: RwLock::new(gossip_channels),
            topology,
            topology_gossip,
            local_addr: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Register a channel. A name can only be registered once.
    pub fn new_gossip(&self, name: &str, gossiper: Arc<dyn Gossiper>) -> Result<Arc<GossipChannel>> {
        let mut channels = self.gossip_channels.write();
        if channels.contains_key(name) {
            return Err(GossipError::DuplicateChannel(name.to_string()).into());
        }
        let channel = Arc::new(GossipChannel::new(
            name,
            self.ourself.clone(),
            self.routes.clone(),
            gossiper,
        ));
        channels.insert(name.to_string(), channel.clone());
        debug!("[{}] registered gossip channel {}", self.ourself.name, name);
        Ok(channel)
    }

    pub fn get_gossip(&self, name: &str) -> Option<Arc<GossipChannel>> {
        self.gossip_channels.read().get(name).cloned()
    }

    /// Look up a channel, creating a surrogate if nobody registered it.
    /// The gossiper maker runs under the registry's write lock and must not
    /// call back into channel registration.
    pub fn gossip_channel(&self, name: &str) -> Arc<GossipChannel> {
        if let Some(channel) = self.get_gossip(name) {
            return channel;
        }
        let mut channels = self.gossip_channels.write();
        if let Some(channel) = channels.get(name) {
            return channel.clone();
        }
        let gossiper: Arc<dyn Gossiper> = match &self.gossiper_maker {
            Some(maker) => maker.make_gossiper(name, self),
            None => Arc::new(SurrogateGossiper::new(self.config.gossip_interval())),
        };
        info!("[gossip {}] created surrogate channel", name);
        let channel = Arc::new(GossipChannel::new(
            name,
            self.ourself.clone(),
            self.routes.clone(),
            gossiper,
        ));
        channels.insert(name.to_string(), channel.clone());
        channel
    }

    /// Every channel at this instant; safe to iterate while sending
    pub fn gossip_channel_set(&self) -> Vec<Arc<GossipChannel>> {
        self.gossip_channels.read().values().cloned().collect()
    }

    pub fn topology(&self) -> &Arc<TopologyReconciler> {
        &self.topology
    }

    /// Dispatch one inbound gossip message by its protocol tag
    pub async fn handle_gossip(&self, tag: ProtocolTag, payload: &[u8]) -> Result<()> {
        let (header, rest) = GossipHeader::decode(payload)?;
        let channel = self.gossip_channel(&header.channel);
        match tag {
            ProtocolTag::GossipUnicast => {
                channel
                    .deliver_unicast(header.sender, payload, rest)
                    .await
            }
            ProtocolTag::GossipBroadcast => channel.deliver_broadcast(header.sender, rest),
            ProtocolTag::Gossip => channel.deliver(header.sender, rest),
        }
    }

    /// Periodic anti-entropy: every channel's state to a neighbour subset
    pub fn send_all_gossip(&self) {
        for channel in self.gossip_channel_set() {
            if let Some(data) = channel.gossiper().gossip() {
                channel.send(Arc::from(data));
            }
        }
    }

    /// Every channel's state down one connection, used when it comes up
    pub fn send_all_gossip_down(&self, conn: &GossipConnection) {
        for channel in self.gossip_channel_set() {
            if let Some(data) = channel.gossiper().gossip() {
                channel.send_down(conn, Arc::from(data));
            }
        }
    }

    /// Flush queued gossip on every connection. Returns whether anything was sent.
    pub async fn send_pending_gossip(&self) -> bool {
        let mut sent_something = false;
        for conn in self.ourself.connections() {
            sent_something = conn.flush().await || sent_something;
        }
        sent_something
    }

    pub fn broadcast_topology_update(&self, update: PeerNameSet) {
        if update.is_empty() {
            return;
        }
        let data = self.topology.data(update);
        self.topology_gossip.gossip_neighbour_subset(Arc::new(data));
    }

    /// Whether the remote's address lies in a trusted subnet
    pub fn trusts(&self, remote: &RemoteConnection) -> bool {
        match remote.remote_tcp_addr.parse::<SocketAddr>() {
            Ok(addr) => self.config.trusts_ip(addr.ip()),
            Err(e) => {
                error!(
                    "[{}] unable to parse remote address {}: {}",
                    self.ourself.name, remote.remote_tcp_addr, e
                );
                false
            }
        }
    }

    /// Bind the listener and spawn the accept and gossip loops
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let address = self.config.listen_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| transport_error!("unable to listen on {}: {}", address, e))?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(local_addr);
        info!(
            "[{}] {} listening on {}",
            self.ourself.name,
            settings::APP_NAME,
            local_addr
        );

        let accept = tokio::spawn(self.clone().accept_loop(listener));
        let gossip = tokio::spawn(self.clone().gossip_loop());
        self.tasks.lock().extend([accept, gossip]);
        self.connection_maker.start(self);
        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut limiter = TokenBucket::new(settings::ACCEPT_MAX_TOKENS, settings::ACCEPT_TOKEN_DELAY);
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => self.accept_tcp(stream, addr),
                Err(e) => error!("[{}] accept failed: {}", self.ourself.name, e),
            }
            limiter.wait().await;
        }
    }

    fn accept_tcp(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        info!("->[{}] connection accepted", addr);
        let remote = RemoteConnection::new(self.ourself.name, addr.to_string(), false);
        self.bootstrap
            .start_local_connection(remote, stream, self.clone(), true);
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.gossip_interval());
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.send_all_gossip();
        }
    }

    /// Hand a dialed socket to the bootstrap
    pub fn start_outbound(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let remote = RemoteConnection::new(self.ourself.name, addr.to_string(), true);
        self.bootstrap
            .start_local_connection(remote, stream, self.clone(), true);
    }

    /// Address the listener actually bound, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Best effort: background tasks are aborted, not drained
    pub fn stop(&self) -> Result<()> {
        self.overlay.stop();
        self.connection_maker.stop();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        for conn in self.ourself.connections() {
            conn.stop();
        }
        info!("[{}] stopped", self.ourself.name);
        Ok(())
    }

    /// Register an established connection and tell the mesh about it
    pub fn add_connection(&self, conn: Arc<dyn Connection>) -> Result<Arc<GossipConnection>> {
        let gossip_conn = self.ourself.add_connection(conn)?;
        info!(
            "[{}] connection added to {}",
            self.ourself.name,
            gossip_conn.remote_name()
        );
        let changed = self.peers.update_local(self.ourself.connected_names());
        self.routes.recalculate();
        self.connection_maker.refresh();

        let runner = gossip_conn.clone();
        tokio::spawn(async move { runner.run().await });

        self.send_all_gossip_down(&gossip_conn);
        self.broadcast_topology_update(changed);
        Ok(gossip_conn)
    }

    pub fn remove_connection(&self, remote: &PeerName) {
        let Some(conn) = self.ourself.remove_connection(remote) else {
            return;
        };
        conn.stop();
        info!("[{}] connection deleted to {}", self.ourself.name, remote);
        let changed = self.peers.update_local(self.ourself.connected_names());
        self.peers.garbage_collect();
        self.routes.recalculate();
        self.connection_maker.refresh();
        self.broadcast_topology_update(changed);
    }

    pub fn status(&self) -> Status {
        let mut channels: Vec<String> = self.gossip_channels.read().keys().cloned().collect();
        channels.sort();
        Status {
            name: self.ourself.name.to_string(),
            nickname: self.ourself.nickname.clone(),
            port: self.config.port,
            local_addr: self.local_addr().map(|a| a.to_string()),
            peer_discovery: self.config.peer_discovery,
            protocol_min_version: self.config.protocol_min_version,
            conn_limit: self.config.conn_limit,
            peers: self.peers.names().iter().map(|n| n.to_string()).collect(),
            connections: self
                .ourself
                .connections()
                .iter()
                .map(|c| ConnectionStatus {
                    name: c.remote_name().to_string(),
                    address: c.connection().remote_tcp_addr(),
                    outbound: c.connection().outbound(),
                })
                .collect(),
            channels,
            trusted_subnets: self
                .config
                .trusted_subnets
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}
