//! Stand-in gossiper for channels seen on the wire before anyone registered them
use std::any::Any;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::{GossipData, Gossiper};
use crate::error::Result;
use crate::peer::PeerName;

struct PrevUpdate {
    update: Bytes,
    hash: u64,
    seen: Instant,
}

/// Relays traffic for an unregistered channel without interpreting it.
///
/// Merge gossip is relayed once per distinct payload per gossip interval so
/// that periodic re-sends from neighbours do not bounce around forever.
pub struct SurrogateGossiper {
    gossip_interval: Duration,
    prev_updates: Mutex<Vec<PrevUpdate>>,
}

impl SurrogateGossiper {
    pub fn new(gossip_interval: Duration) -> Self {
        Self {
            gossip_interval,
            prev_updates: Mutex::new(Vec::new()),
        }
    }

    fn hash_update(update: &[u8]) -> u64 {
        let mut s = DefaultHasher::new();
        update.hash(&mut s);
        s.finish()
    }
}

impl Gossiper for SurrogateGossiper {
    fn gossip(&self) -> Option<Box<dyn GossipData>> {
        None
    }

    fn on_gossip_unicast(&self, sender: PeerName, msg: &[u8]) -> Result<()> {
        debug!(
            "surrogate dropping {} byte unicast from {}",
            msg.len(),
            sender
        );
        Ok(())
    }

    fn on_gossip_broadcast(
        &self,
        _sender: PeerName,
        update: &[u8],
    ) -> Result<Option<Box<dyn GossipData>>> {
        Ok(Some(Box::new(SurrogateGossipData::new(update))))
    }

    fn on_gossip(&self, update: &[u8]) -> Result<Option<Box<dyn GossipData>>> {
        let hash = Self::hash_update(update);
        let now = Instant::now();
        let mut prev_updates = self.prev_updates.lock();
        if prev_updates
            .iter()
            .any(|p| p.hash == hash && p.update.as_ref() == update)
        {
            return Ok(None);
        }
        // Forget anything older than the gossip interval so this doesn't grow forever
        prev_updates.retain(|p| now.duration_since(p.seen) <= self.gossip_interval);
        prev_updates.push(PrevUpdate {
            update: Bytes::copy_from_slice(update),
            hash,
            seen: now,
        });
        Ok(Some(Box::new(SurrogateGossipData::new(update))))
    }
}

/// Opaque payloads held for relay. Merging concatenates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SurrogateGossipData {
    messages: Vec<Bytes>,
}

impl SurrogateGossipData {
    pub fn new(update: &[u8]) -> Self {
        Self {
            messages: vec![Bytes::copy_from_slice(update)],
        }
    }

    pub fn messages(&self) -> &[Bytes] {
        &self.messages
    }
}

impl GossipData for SurrogateGossipData {
    fn encode(&self) -> Vec<Bytes> {
        self.messages.clone()
    }

    fn merge(&self, other: &dyn GossipData) -> Box<dyn GossipData> {
        let mut messages = self.messages.clone();
        messages.extend(other.encode());
        Box::new(SurrogateGossipData { messages })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
