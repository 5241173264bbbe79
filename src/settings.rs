//! Mesh router settings
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config_error;
use crate::error::{MeshError, Result};

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Port used for all mesh communication
pub const DEFAULT_PORT: u16 = 6783;
pub const DEFAULT_PORT_STR: &str = "6783";

pub const DEFAULT_GOSSIP_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_CONN_LIMIT: usize = 100;

pub const ACCEPT_MAX_TOKENS: usize = 20;
pub const ACCEPT_TOKEN_DELAY: Duration = Duration::from_millis(50);

pub const PROTOCOL_VERSION: u8 = 2;
pub const PROTOCOL_MIN_VERSION: u8 = 1;

/// Largest frame accepted from a peer
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Config defines dimensions of configuration for the router.
#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub password: Option<Vec<u8>>,
    pub conn_limit: usize,
    pub protocol_min_version: u8,
    pub peer_discovery: bool,
    pub trusted_subnets: Vec<TrustedSubnet>,
    pub gossip_interval: Option<Duration>,
    // Every node in the mesh is directly connected to every other node
    pub single_hop_topology: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            password: None,
            conn_limit: DEFAULT_CONN_LIMIT,
            protocol_min_version: PROTOCOL_MIN_VERSION,
            peer_discovery: true,
            trusted_subnets: Vec::new(),
            gossip_interval: None,
            single_hop_topology: false,
        }
    }
}

impl Config {
    pub fn gossip_interval(&self) -> Duration {
        self.gossip_interval.unwrap_or(DEFAULT_GOSSIP_INTERVAL)
    }

    pub fn using_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn listen_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn trusts_ip(&self, ip: IpAddr) -> bool {
        self.trusted_subnets.iter().any(|subnet| subnet.contains(ip))
    }
}

/// An IP range for which authentication requirements may be relaxed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedSubnet {
    network: IpAddr,
    prefix_len: u8,
}

impl TrustedSubnet {
    pub fn new(network: IpAddr, prefix_len: u8) -> Result<Self> {
        let max_len = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix_len > max_len {
            return Err(config_error!(
                "prefix length {} too long for {}",
                prefix_len,
                network
            ));
        }
        Ok(Self {
            network,
            prefix_len,
        })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = prefix_mask(self.prefix_len, 32) as u32;
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = prefix_mask(self.prefix_len, 128);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            (IpAddr::V4(_), IpAddr::V6(ip)) => match ip.to_ipv4_mapped() {
                Some(v4) => self.contains(IpAddr::V4(v4)),
                None => false,
            },
            (IpAddr::V6(_), IpAddr::V4(_)) => false,
        }
    }
}

fn prefix_mask(prefix_len: u8, bits: u32) -> u128 {
    if prefix_len == 0 {
        return 0;
    }
    let all = if bits == 128 { u128::MAX } else { (1u128 << bits) - 1 };
    all & !((1u128 << (bits - u32::from(prefix_len))) - 1)
}

impl std::fmt::Display for TrustedSubnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl std::str::FromStr for TrustedSubnet {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| config_error!("Invalid subnet '{}': expected ADDR/PREFIX", s))?;
        let network: IpAddr = addr
            .trim()
            .parse()
            .map_err(|e| config_error!("Invalid subnet address '{}': {}", addr, e))?;
        let prefix_len: u8 = prefix
            .trim()
            .parse()
            .map_err(|e| config_error!("Invalid subnet prefix '{}': {}", prefix, e))?;
        Self::new(network, prefix_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gossip_interval_default_and_override() {
        let mut config = Config::default();
        assert_eq!(config.gossip_interval(), DEFAULT_GOSSIP_INTERVAL);

        config.gossip_interval = Some(Duration::from_millis(250));
        assert_eq!(config.gossip_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_using_password() {
        let mut config = Config::default();
        assert!(!config.using_password());
        config.password = Some(b"secret".to_vec());
        assert!(config.using_password());
    }

    #[test]
    fn test_listen_address_formats_ipv6() {
        let config = Config {
            host: "::1".to_string(),
            port: 7000,
            ..Config::default()
        };
        assert_eq!(config.listen_address(), "[::1]:7000");
    }

    #[test]
    fn test_subnet_contains_v4() {
        let subnet: TrustedSubnet = "10.1.0.0/16".parse().unwrap();
        assert!(subnet.contains("10.1.200.3".parse().unwrap()));
        assert!(!subnet.contains("10.2.0.1".parse().unwrap()));
        assert!(subnet.contains("::ffff:10.1.0.9".parse().unwrap()));
        assert_eq!(subnet.to_string(), "10.1.0.0/16");
    }

    #[test]
    fn test_subnet_contains_v6_and_edges() {
        let subnet: TrustedSubnet = "fd00::/8".parse().unwrap();
        assert!(subnet.contains("fd12:3456::1".parse().unwrap()));
        assert!(!subnet.contains("fe80::1".parse().unwrap()));
        assert!(!subnet.contains("10.0.0.1".parse().unwrap()));

        let everything: TrustedSubnet = "0.0.0.0/0".parse().unwrap();
        assert!(everything.contains("192.168.1.1".parse().unwrap()));

        let host: TrustedSubnet = "192.168.1.1/32".parse().unwrap();
        assert!(host.contains("192.168.1.1".parse().unwrap()));
        assert!(!host.contains("192.168.1.2".parse().unwrap()));
    }

    #[test]
    fn test_subnet_parse_errors() {
        assert!("10.0.0.0".parse::<TrustedSubnet>().is_err());
        assert!("10.0.0.0/33".parse::<TrustedSubnet>().is_err());
        assert!("nonsense/8".parse::<TrustedSubnet>().is_err());
    }
}
