//! Connection layer
//!
//! The router only needs to push tagged protocol messages at a connected
//! peer and to hand freshly accepted sockets to something that negotiates
//! identity. Both seams are traits so tests can run meshes in memory.
pub mod framing;
pub mod tcp_connection;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::error::Result;
use crate::gossip::ProtocolMsg;
use crate::peer::PeerName;
use crate::router::Router;

pub use tcp_connection::{Handshake, TcpBootstrap, TcpConnection};

/// An established connection to a remote peer
#[async_trait]
pub trait Connection: Send + Sync {
    fn remote_name(&self) -> PeerName;

    fn remote_tcp_addr(&self) -> String;

    fn outbound(&self) -> bool;

    async fn send_protocol_msg(&self, msg: ProtocolMsg) -> Result<()>;
}

/// What we know about a connection before the handshake names the remote
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteConnection {
    pub local: PeerName,
    pub remote: Option<PeerName>,
    pub remote_tcp_addr: String,
    pub outbound: bool,
}

impl RemoteConnection {
    pub fn new(local: PeerName, remote_tcp_addr: String, outbound: bool) -> Self {
        Self {
            local,
            remote: None,
            remote_tcp_addr,
            outbound,
        }
    }
}

/// Turns a raw socket into a running connection
pub trait ConnectionBootstrap: Send + Sync {
    /// Take ownership of `stream` and drive it on its own task. When
    /// `accept_new_peer` is false, remotes absent from membership are refused.
    fn start_local_connection(
        &self,
        remote: RemoteConnection,
        stream: TcpStream,
        router: Arc<Router>,
        accept_new_peer: bool,
    );
}
