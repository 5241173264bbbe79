//! Per-connection gossip queues
//!
//! Each connection keeps one `GossipSender` per channel. Data handed to a
//! sender is merged into whatever is already pending, so a slow connection
//! accumulates one merged update per channel (plus one per broadcast source)
//! rather than an unbounded backlog.
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::messages::{make_gossip_msg, ProtocolTag};
use super::GossipData;
use crate::error::Result;
use crate::peer::PeerName;
use crate::transport::Connection;

#[derive(Default)]
struct PendingGossip {
    gossip: Option<Arc<dyn GossipData>>,
    broadcasts: BTreeMap<PeerName, Arc<dyn GossipData>>,
}

pub struct GossipSender {
    channel: String,
    ourself: PeerName,
    pending: Mutex<PendingGossip>,
    wake: Arc<Notify>,
}

impl GossipSender {
    fn new(channel: &str, ourself: PeerName, wake: Arc<Notify>) -> Self {
        Self {
            channel: channel.to_string(),
            ourself,
            pending: Mutex::new(PendingGossip::default()),
            wake,
        }
    }

    /// Queue anti-entropy data, merging with anything pending
    pub fn send(&self, data: Arc<dyn GossipData>) {
        {
            let mut pending = self.pending.lock();
            pending.gossip = Some(match pending.gossip.take() {
                Some(existing) => Arc::from(existing.merge(data.as_ref())),
                None => data,
            });
        }
        self.wake.notify_one();
    }

    /// Queue broadcast data originating at `src`
    pub fn broadcast(&self, src: PeerName, data: Arc<dyn GossipData>) {
        {
            let mut pending = self.pending.lock();
            let merged = match pending.broadcasts.remove(&src) {
                Some(existing) => Arc::from(existing.merge(data.as_ref())),
                None => data,
            };
            pending.broadcasts.insert(src, merged);
        }
        self.wake.notify_one();
    }

    /// Send everything pending down `conn`. Returns whether anything was sent.
    pub async fn flush(&self, conn: &dyn Connection) -> Result<bool> {
        let (gossip, broadcasts) = {
            let mut pending = self.pending.lock();
            (
                pending.gossip.take(),
                std::mem::take(&mut pending.broadcasts),
            )
        };
        let mut sent = false;
        if let Some(data) = gossip {
            for payload in data.encode() {
                let msg = make_gossip_msg(ProtocolTag::Gossip, &self.channel, self.ourself, &payload)?;
                conn.send_protocol_msg(msg).await?;
                sent = true;
            }
        }
        for (src, data) in broadcasts {
            for payload in data.encode() {
                let msg = make_gossip_msg(ProtocolTag::GossipBroadcast, &self.channel, src, &payload)?;
                conn.send_protocol_msg(msg).await?;
                sent = true;
            }
        }
        Ok(sent)
    }
}

/// All gossip senders belonging to one connection
pub struct GossipSenders {
    senders: Mutex<HashMap<String, Arc<GossipSender>>>,
    wake: Arc<Notify>,
    stopped: AtomicBool,
}

impl Default for GossipSenders {
    fn default() -> Self {
        Self {
            senders: Mutex::new(HashMap::new()),
            wake: Arc::new(Notify::new()),
            stopped: AtomicBool::new(false),
        }
    }
}

impl GossipSenders {
    /// The sender for `channel`, created on first use
    pub fn sender(&self, channel: &str, ourself: PeerName) -> Arc<GossipSender> {
        self.senders
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(GossipSender::new(channel, ourself, self.wake.clone())))
            .clone()
    }

    /// Flush every channel's pending data. Failures are logged per channel.
    pub async fn flush(&self, conn: &dyn Connection) -> bool {
        let senders: Vec<Arc<GossipSender>> = self.senders.lock().values().cloned().collect();
        let mut sent_something = false;
        for sender in senders {
            match sender.flush(conn).await {
                Ok(sent) => sent_something = sent || sent_something,
                Err(e) => warn!(
                    "[gossip {}] failed sending to {}: {}",
                    sender.channel,
                    conn.remote_name(),
                    e
                ),
            }
        }
        sent_something
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// A connection as seen by the gossip layer
pub struct GossipConnection {
    conn: Arc<dyn Connection>,
    senders: GossipSenders,
}

impl std::fmt::Debug for GossipConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GossipConnection")
            .field("remote", &self.conn.remote_name())
            .field("addr", &self.conn.remote_tcp_addr())
            .finish()
    }
}

impl GossipConnection {
    pub fn new(conn: Arc<dyn Connection>) -> Self {
        Self {
            conn,
            senders: GossipSenders::default(),
        }
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    pub fn remote_name(&self) -> PeerName {
        self.conn.remote_name()
    }

    pub fn senders(&self) -> &GossipSenders {
        &self.senders
    }

    /// Force out any queued gossip
    pub async fn flush(&self) -> bool {
        self.senders.flush(self.conn.as_ref()).await
    }

    /// Flush whenever a sender is woken, until stopped
    pub async fn run(&self) {
        loop {
            self.senders.wake.notified().await;
            if self.senders.is_stopped() {
                debug!("gossip senders for {} stopped", self.remote_name());
                break;
            }
            self.flush().await;
        }
    }

    pub fn stop(&self) {
        self.senders.stop();
    }
}
