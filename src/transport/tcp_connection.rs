//! TCP connections between mesh peers
//!
//! Both ends send a handshake frame as soon as the socket is up, then read
//! the other's. Once the remote is validated the connection is registered
//! with the router and a reader loop dispatches every protocol frame.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bincode::{Decode, Encode};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::framing::{decode_protocol_msg, encode_protocol_msg, read_frame_bytes, write_frame_bytes};
use super::{Connection, ConnectionBootstrap, RemoteConnection};
use crate::error::{MeshError, Result};
use crate::gossip::messages::{decode_value, encode_value};
use crate::gossip::ProtocolMsg;
use crate::peer::PeerName;
use crate::router::Router;
use crate::settings;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_HANDSHAKE_SIZE: usize = 4096;

/// First frame sent in each direction
#[derive(Clone, Debug, PartialEq, Eq, Decode, Encode)]
pub struct Handshake {
    pub version: u8,
    pub name: PeerName,
    pub nickname: String,
    pub password_set: bool,
}

impl Handshake {
    pub fn for_router(router: &Router) -> Self {
        Self {
            version: settings::PROTOCOL_VERSION,
            name: router.ourself.name,
            nickname: router.ourself.nickname.clone(),
            password_set: router.config.using_password(),
        }
    }

    /// Check a remote's handshake against our configuration
    pub fn validate(&self, router: &Router, remote: &RemoteConnection) -> Result<()> {
        if self.version < router.config.protocol_min_version {
            return Err(MeshError::Handshake(format!(
                "protocol version {} below minimum {}",
                self.version, router.config.protocol_min_version
            )));
        }
        if self.name == router.ourself.name {
            return Err(MeshError::Handshake("cannot connect to ourself".to_string()));
        }
        if self.password_set != router.config.using_password() && !router.trusts(remote) {
            return Err(MeshError::Handshake(format!(
                "password mismatch: remote {} a password, we {}",
                if self.password_set { "uses" } else { "does not use" },
                if router.config.using_password() { "do" } else { "do not" },
            )));
        }
        Ok(())
    }
}

/// A handshaken TCP connection. Writes are serialized through the mutex.
pub struct TcpConnection {
    remote: PeerName,
    remote_tcp_addr: String,
    outbound: bool,
    writer: Mutex<OwnedWriteHalf>,
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("remote", &self.remote)
            .field("remote_tcp_addr", &self.remote_tcp_addr)
            .field("outbound", &self.outbound)
            .finish()
    }
}

#[async_trait]
impl Connection for TcpConnection {
    fn remote_name(&self) -> PeerName {
        self.remote
    }

    fn remote_tcp_addr(&self) -> String {
        self.remote_tcp_addr.clone()
    }

    fn outbound(&self) -> bool {
        self.outbound
    }

    async fn send_protocol_msg(&self, msg: ProtocolMsg) -> Result<()> {
        let frame = encode_protocol_msg(&msg);
        let mut writer = self.writer.lock().await;
        write_frame_bytes(&mut *writer, &frame).await
    }
}

/// Default bootstrap: handshake over the raw socket, then run the reader
#[derive(Debug, Default)]
pub struct TcpBootstrap;

impl TcpBootstrap {
    async fn handshake(
        router: &Router,
        remote: &RemoteConnection,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
    ) -> Result<Handshake> {
        let ours = encode_value(&Handshake::for_router(router))?;
        write_frame_bytes(writer, &ours).await?;

        let frame = timeout(HANDSHAKE_TIMEOUT, read_frame_bytes(reader, MAX_HANDSHAKE_SIZE))
            .await
            .map_err(|_| MeshError::Handshake("timed out".to_string()))??
            .ok_or_else(|| MeshError::Handshake("connection closed".to_string()))?;
        let (theirs, _): (Handshake, usize) = decode_value(&frame)?;
        theirs.validate(router, remote)?;
        Ok(theirs)
    }

    async fn run(
        mut remote: RemoteConnection,
        stream: TcpStream,
        router: Arc<Router>,
        accept_new_peer: bool,
    ) -> Result<()> {
        if !remote.outbound && router.ourself.connection_count() >= router.config.conn_limit {
            return Err(MeshError::Handshake(format!(
                "too many connections ({})",
                router.config.conn_limit
            )));
        }
        let (mut reader, mut writer) = stream.into_split();
        let theirs = Self::handshake(&router, &remote, &mut reader, &mut writer).await?;
        if !accept_new_peer && !router.peers.names().contains(&theirs.name) {
            return Err(MeshError::Handshake(format!(
                "refusing unknown peer {}({})",
                theirs.name, theirs.nickname
            )));
        }
        if remote.outbound {
            router
                .connection_maker
                .dialed(&remote.remote_tcp_addr, theirs.name);
        }
        remote.remote = Some(theirs.name);
        info!(
            "[{}] handshake complete with {}({}) at {}",
            router.ourself.name, theirs.name, theirs.nickname, remote.remote_tcp_addr
        );

        let conn = Arc::new(TcpConnection {
            remote: theirs.name,
            remote_tcp_addr: remote.remote_tcp_addr.clone(),
            outbound: remote.outbound,
            writer: Mutex::new(writer),
        });
        router.add_connection(conn)?;

        let result = Self::read_loop(&router, theirs.name, &mut reader).await;
        router.remove_connection(&theirs.name);
        result
    }

    async fn read_loop(router: &Router, remote: PeerName, reader: &mut OwnedReadHalf) -> Result<()> {
        while let Some(frame) = read_frame_bytes(reader, settings::MAX_FRAME_SIZE).await? {
            let msg = match decode_protocol_msg(frame) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("[{}] bad frame from {}: {}", router.ourself.name, remote, e);
                    continue;
                }
            };
            if let Err(e) = router.handle_gossip(msg.tag, &msg.payload).await {
                warn!(
                    "[{}] error handling {} from {}: {}",
                    router.ourself.name, msg.tag, remote, e
                );
            }
        }
        debug!("[{}] connection to {} closed", router.ourself.name, remote);
        Ok(())
    }
}

impl ConnectionBootstrap for TcpBootstrap {
    fn start_local_connection(
        &self,
        remote: RemoteConnection,
        stream: TcpStream,
        router: Arc<Router>,
        accept_new_peer: bool,
    ) {
        tokio::spawn(async move {
            let addr = remote.remote_tcp_addr.clone();
            let ourself = router.ourself.name;
            if let Err(e) = Self::run(remote, stream, router, accept_new_peer).await {
                warn!("[{}] ->[{}] connection shutting down: {}", ourself, addr, e);
            }
        });
    }
}
