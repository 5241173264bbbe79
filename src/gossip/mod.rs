//! Gossip dissemination
//!
//! A gossip channel is one named topic multiplexed over the mesh's shared
//! connections. Each channel is driven by a pluggable [`Gossiper`] that
//! produces outgoing [`GossipData`] and consumes unicast, broadcast and
//! merge (anti-entropy) messages.
//!
//! Broadcast and merge delivery relay differently: a broadcast relays
//! exactly what was received, while a merge relays only the improvement the
//! receiver derived from it.
use std::any::Any;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;
use crate::peer::PeerName;
use crate::router::Router;

pub mod channel;
pub mod messages;
pub mod sender;
pub mod surrogate;

pub use channel::GossipChannel;
pub use messages::{GossipHeader, ProtocolMsg, ProtocolTag};
pub use sender::{GossipConnection, GossipSender, GossipSenders};
pub use surrogate::{SurrogateGossipData, SurrogateGossiper};

/// A delta or snapshot of gossiped state.
///
/// `merge` must be a join: commutative, associative and idempotent, and it
/// must never drop information present in either operand of its own type.
/// A channel only ever merges data produced by its own gossiper, so a
/// foreign operand is a bug; implementations log it and keep `self`.
pub trait GossipData: Send + Sync + std::fmt::Debug {
    /// One or more wire payloads; large updates may be split
    fn encode(&self) -> Vec<Bytes>;

    fn merge(&self, other: &dyn GossipData) -> Box<dyn GossipData>;

    fn as_any(&self) -> &dyn Any;
}

/// Behaviour attached to one gossip channel
pub trait Gossiper: Send + Sync {
    /// State to push during periodic gossip, if any
    fn gossip(&self) -> Option<Box<dyn GossipData>>;

    fn on_gossip_unicast(&self, sender: PeerName, msg: &[u8]) -> Result<()>;

    /// Returns the data to keep relaying, normally the received update itself
    fn on_gossip_broadcast(
        &self,
        sender: PeerName,
        update: &[u8],
    ) -> Result<Option<Box<dyn GossipData>>>;

    /// Merge a received update and return what was new to us
    fn on_gossip(&self, update: &[u8]) -> Result<Option<Box<dyn GossipData>>>;
}

/// Creates gossipers for channels first seen on the wire
pub trait GossiperMaker: Send + Sync {
    fn make_gossiper(&self, channel_name: &str, router: &Router) -> Arc<dyn Gossiper>;
}
