//! Outbound connection management
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::peer::{LocalPeer, PeerName};
use crate::router::Router;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Decides which peers should have outbound connections
pub trait ConnectionMaker: Send + Sync {
    /// Re-evaluate outbound connections after membership changed
    fn refresh(&self);

    /// An outbound dial to `addr` completed its handshake with `name`
    fn dialed(&self, _addr: &str, _name: PeerName) {}

    /// Begin background work once the router is running
    fn start(&self, _router: &Arc<Router>) {}

    fn stop(&self) {}
}

/// Dials a configured set of addresses and keeps trying until connected
pub struct TcpConnectionMaker {
    targets: Arc<RwLock<Vec<SocketAddr>>>,
    // Who answered at each target, so inbound connections count too
    dialed: Arc<RwLock<HashMap<SocketAddr, PeerName>>>,
    peer_discovery: bool,
    wake: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TcpConnectionMaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnectionMaker")
            .field("targets", &*self.targets.read())
            .field("peer_discovery", &self.peer_discovery)
            .finish()
    }
}

impl TcpConnectionMaker {
    pub fn new(targets: Vec<SocketAddr>, peer_discovery: bool) -> Self {
        Self {
            targets: Arc::new(RwLock::new(targets)),
            dialed: Arc::new(RwLock::new(HashMap::new())),
            peer_discovery,
            wake: Arc::new(Notify::new()),
            task: Mutex::new(None),
        }
    }

    pub fn peer_discovery(&self) -> bool {
        self.peer_discovery
    }

    pub fn targets(&self) -> Vec<SocketAddr> {
        self.targets.read().clone()
    }

    /// Add addresses to the dial list and dial them promptly
    pub fn initiate_connections(&self, addrs: &[SocketAddr]) {
        {
            let mut targets = self.targets.write();
            for addr in addrs {
                if !targets.contains(addr) {
                    targets.push(*addr);
                }
            }
        }
        self.refresh();
    }

    pub fn forget_connection(&self, addr: &SocketAddr) {
        self.targets.write().retain(|t| t != addr);
        self.dialed.write().remove(addr);
    }

    /// Targets not already connected, by address or by the peer behind it
    pub fn due_targets(&self, ourself: &LocalPeer) -> Vec<SocketAddr> {
        due_targets(&self.targets.read(), &self.dialed.read(), ourself)
    }

    async fn connect_all(router: &Arc<Router>, targets: Vec<SocketAddr>) {
        for target in targets {
            match timeout(DIAL_TIMEOUT, TcpStream::connect(target)).await {
                Ok(Ok(stream)) => {
                    info!("->[{}] attempting connection", target);
                    router.start_outbound(stream, target);
                }
                Ok(Err(e)) => debug!("->[{}] connection failed: {}", target, e),
                Err(_) => debug!("->[{}] connection timed out", target),
            }
        }
    }
}

impl ConnectionMaker for TcpConnectionMaker {
    fn refresh(&self) {
        self.wake.notify_one();
    }

    fn dialed(&self, addr: &str, name: PeerName) {
        if let Ok(addr) = addr.parse::<SocketAddr>() {
            self.dialed.write().insert(addr, name);
        }
    }

    fn start(&self, router: &Arc<Router>) {
        let router = router.clone();
        let targets = self.targets.clone();
        let dialed = self.dialed.clone();
        let wake = self.wake.clone();
        let handle = tokio::spawn(async move {
            loop {
                let due = due_targets(&targets.read(), &dialed.read(), &router.ourself);
                Self::connect_all(&router, due).await;
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = tokio::time::sleep(RETRY_INTERVAL) => {}
                }
            }
        });
        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
    }

    fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

fn due_targets(
    targets: &[SocketAddr],
    dialed: &HashMap<SocketAddr, PeerName>,
    ourself: &LocalPeer,
) -> Vec<SocketAddr> {
    targets
        .iter()
        .filter(|target| !ourself.is_connected_to_addr(&target.to_string()))
        .filter(|target| {
            dialed
                .get(*target)
                .map_or(true, |name| ourself.connection_to(name).is_none())
        })
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::Result;
    use crate::gossip::ProtocolMsg;
    use crate::transport::Connection;

    struct Accepted {
        remote: PeerName,
        addr: String,
    }

    #[async_trait]
    impl Connection for Accepted {
        fn remote_name(&self) -> PeerName {
            self.remote
        }

        fn remote_tcp_addr(&self) -> String {
            self.addr.clone()
        }

        fn outbound(&self) -> bool {
            false
        }

        async fn send_protocol_msg(&self, _msg: ProtocolMsg) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_peer_connected_inbound_is_not_redialed() {
        let target: SocketAddr = "127.0.0.1:6783".parse().unwrap();
        let maker = TcpConnectionMaker::new(vec![target], true);
        let ourself = LocalPeer::new(PeerName::new(1), "one");
        // The peer dialed us first, from an ephemeral port
        ourself
            .add_connection(Arc::new(Accepted {
                remote: PeerName::new(2),
                addr: "127.0.0.1:51234".to_string(),
            }))
            .unwrap();

        // Until a dial tells us who lives there, the target stays due
        assert_eq!(maker.due_targets(&ourself), vec![target]);

        maker.dialed(&target.to_string(), PeerName::new(2));
        assert!(maker.due_targets(&ourself).is_empty());

        ourself.remove_connection(&PeerName::new(2));
        assert_eq!(maker.due_targets(&ourself), vec![target]);
    }

    #[test]
    fn test_connected_address_is_not_due() {
        let target: SocketAddr = "127.0.0.1:6783".parse().unwrap();
        let maker = TcpConnectionMaker::new(vec![target], true);
        let ourself = LocalPeer::new(PeerName::new(1), "one");
        ourself
            .add_connection(Arc::new(Accepted {
                remote: PeerName::new(2),
                addr: target.to_string(),
            }))
            .unwrap();
        assert!(maker.due_targets(&ourself).is_empty());
    }

    #[test]
    fn test_initiate_connections_dedups_targets() {
        let a: SocketAddr = "127.0.0.1:6783".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:6784".parse().unwrap();
        let maker = TcpConnectionMaker::new(vec![a], true);

        maker.initiate_connections(&[a, b]);
        assert_eq!(maker.targets(), vec![a, b]);

        maker.forget_connection(&a);
        assert_eq!(maker.targets(), vec![b]);
        assert!(maker.peer_discovery());
    }
}
