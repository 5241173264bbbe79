//! Peer identity and membership
pub mod local_peer;
pub mod peer_name;
pub mod peers;

pub use local_peer::LocalPeer;
pub use peer_name::{PeerName, PeerNameSet};
pub use peers::{GcCallback, PeerRecord, PeerRegistry, Peers};
