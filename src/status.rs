//! Router status reporting
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub name: String,
    pub address: String,
    pub outbound: bool,
}

/// Point-in-time view of a router
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub name: String,
    pub nickname: String,
    pub port: u16,
    pub local_addr: Option<String>,
    pub peer_discovery: bool,
    pub protocol_min_version: u8,
    pub conn_limit: usize,
    pub peers: Vec<String>,
    pub connections: Vec<ConnectionStatus>,
    pub channels: Vec<String>,
    pub trusted_subnets: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_to_json() {
        let status = Status {
            name: "00:00:00:00:00:01".to_string(),
            nickname: "one".to_string(),
            port: 6783,
            local_addr: None,
            peer_discovery: true,
            protocol_min_version: 1,
            conn_limit: 100,
            peers: vec!["00:00:00:00:00:01".to_string()],
            connections: vec![ConnectionStatus {
                name: "00:00:00:00:00:02".to_string(),
                address: "10.0.0.2:6783".to_string(),
                outbound: true,
            }],
            channels: vec!["topology".to_string()],
            trusted_subnets: vec!["10.0.0.0/8".to_string()],
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["nickname"], "one");
        assert_eq!(json["connections"][0]["outbound"], true);
        assert_eq!(json["channels"][0], "topology");

        let back: Status = serde_json::from_value(json).unwrap();
        assert_eq!(back, status);
    }
}
