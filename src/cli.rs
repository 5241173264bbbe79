//! CLI for this application
//!
use std::net::SocketAddr;
use std::time::Duration;

use crate::config_error;
use crate::error::Result;
use crate::peer::PeerName;
use crate::settings::{self, TrustedSubnet};

#[derive(Clone, Debug, clap::Parser)]
#[clap(version)]
pub struct Cli {
    // Mesh listen address
    #[clap(
        long,
        default_value = "0.0.0.0",
        env("MESH_HOST"),
        help = "IP address to listen on"
    )]
    pub host: String,

    // Mesh listen port
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_STR,
        env("MESH_PORT"),
        help = "Port for all mesh traffic"
    )]
    pub port: u16,

    // Shared secret; presence switches on authentication
    #[clap(long, env("MESH_PASSWORD"), help = "Network password")]
    pub password: Option<String>,

    #[clap(
        long,
        default_value_t = settings::DEFAULT_CONN_LIMIT,
        env("MESH_CONN_LIMIT"),
        help = "Max simultaneous inbound connections"
    )]
    pub conn_limit: usize,

    #[clap(
        long,
        default_value_t = settings::PROTOCOL_MIN_VERSION,
        env("MESH_PROTOCOL_MIN_VERSION"),
        help = "Oldest protocol version accepted from peers"
    )]
    pub protocol_min_version: u8,

    #[clap(
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        env("MESH_PEER_DISCOVERY"),
        help = "Connect to peers learned through gossip"
    )]
    pub peer_discovery: bool,

    // Trusted subnets, e.g. 10.0.0.0/8
    #[clap(
        long = "trusted-subnet",
        env("MESH_TRUSTED_SUBNETS"),
        value_delimiter = ',',
        help = "CIDR ranges from which unauthenticated peers are accepted"
    )]
    pub trusted_subnets: Vec<String>,

    #[clap(
        long,
        env("MESH_GOSSIP_INTERVAL_SECS"),
        help = "Seconds between periodic gossip rounds (default 30)"
    )]
    pub gossip_interval_secs: Option<u64>,

    #[clap(
        long,
        env("MESH_SINGLE_HOP_TOPOLOGY"),
        help = "Every peer is directly connected to every other"
    )]
    pub single_hop_topology: bool,

    // Peer name; random if unset
    #[clap(long, env("MESH_NAME"), help = "Peer name, e.g. 0a:0b:0c:0d:0e:0f")]
    pub name: Option<String>,

    #[clap(long, env("MESH_NICKNAME"), help = "Human-readable peer nickname")]
    pub nickname: Option<String>,

    // Initial connection targets
    #[clap(
        long = "peer",
        env("MESH_PEERS"),
        value_delimiter = ',',
        help = "Addresses of peers to connect to (e.g., 10.0.0.2:6783,10.0.0.3:6783)"
    )]
    pub peers: Vec<SocketAddr>,
}

impl Cli {
    pub fn into_config(&self) -> Result<settings::Config> {
        let trusted_subnets = self
            .trusted_subnets
            .iter()
            .map(|s| s.parse::<TrustedSubnet>())
            .collect::<Result<Vec<_>>>()?;
        if self.gossip_interval_secs == Some(0) {
            return Err(config_error!("gossip interval must be at least one second"));
        }
        Ok(settings::Config {
            host: self.host.clone(),
            port: self.port,
            password: self.password.as_ref().map(|p| p.as_bytes().to_vec()),
            conn_limit: self.conn_limit,
            protocol_min_version: self.protocol_min_version,
            peer_discovery: self.peer_discovery,
            trusted_subnets,
            gossip_interval: self.gossip_interval_secs.map(Duration::from_secs),
            single_hop_topology: self.single_hop_topology,
        })
    }

    pub fn peer_name(&self) -> Result<PeerName> {
        match &self.name {
            Some(name) => name.parse(),
            None => Ok(PeerName::new(rand::random())),
        }
    }

    pub fn nickname(&self) -> String {
        self.nickname
            .clone()
            .unwrap_or_else(|| format!("{}-{}", settings::APP_NAME, self.port))
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["meshgossip"]).unwrap();
        let config = cli.into_config().unwrap();
        assert_eq!(config.port, settings::DEFAULT_PORT);
        assert_eq!(config.gossip_interval(), settings::DEFAULT_GOSSIP_INTERVAL);
        assert!(config.peer_discovery);
        assert!(!config.using_password());
        assert!(cli.peers.is_empty());
    }

    #[test]
    fn test_flags_build_config() {
        let cli = Cli::try_parse_from([
            "meshgossip",
            "--port",
            "7000",
            "--password",
            "s3cret",
            "--trusted-subnet",
            "10.0.0.0/8",
            "--trusted-subnet",
            "fd00::/8",
            "--gossip-interval-secs",
            "5",
            "--peer-discovery",
            "false",
            "--name",
            "00:00:00:00:00:2a",
            "--peer",
            "127.0.0.1:7001",
        ])
        .unwrap();
        let config = cli.into_config().unwrap();
        assert_eq!(config.port, 7000);
        assert!(config.using_password());
        assert_eq!(config.trusted_subnets.len(), 2);
        assert_eq!(config.gossip_interval(), Duration::from_secs(5));
        assert!(!config.peer_discovery);
        assert_eq!(cli.peer_name().unwrap(), PeerName::new(42));
        assert_eq!(cli.peers, vec!["127.0.0.1:7001".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_bad_subnet_is_a_config_error() {
        let cli =
            Cli::try_parse_from(["meshgossip", "--trusted-subnet", "10.0.0.0"]).unwrap();
        let err = cli.into_config().unwrap_err();
        assert_eq!(err.error_type(), "configuration_error");
    }
}
