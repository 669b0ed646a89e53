//! Mesh configuration record.
//!
//! Loaded by the node from file or environment and handed to
//! [`MeshSocket::new`](crate::MeshSocket::new) once; the mesh never re-reads it.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default UDP port for the mesh.
pub const DEFAULT_PORT: u16 = 41234;

/// Default heartbeat period.
pub const DEFAULT_HEARTBEAT_MS: u64 = 30_000;

/// A statically configured remote mesh endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl Peer {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }
}

impl FromStr for Peer {
    type Err = Error;

    /// Parse `name=host:port`. IPv6 hosts go in brackets: `b=[::1]:41234`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Config(format!("invalid peer '{s}', expected name=host:port"));

        let (name, endpoint) = s.trim().split_once('=').ok_or_else(invalid)?;
        let (host, port) = endpoint.rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        if name.is_empty() || host.is_empty() {
            return Err(invalid());
        }
        Ok(Peer::new(name, host, port))
    }
}

/// Configuration for a [`MeshSocket`](crate::MeshSocket).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// This node's id, carried as the sender of every outbound signal
    pub node_id: String,

    /// UDP address to bind
    pub bind: SocketAddr,

    /// Heartbeat period in milliseconds
    pub heartbeat_interval_ms: u64,

    /// Allowed inbound signal types; empty allows all
    pub allowed_signals: Vec<String>,

    /// Static peer table
    pub peers: Vec<Peer>,

    /// Kernel send buffer size (0 keeps the system default)
    pub send_buffer: usize,

    /// Kernel receive buffer size (0 keeps the system default)
    pub recv_buffer: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            node_id: "warden".to_string(),
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_MS,
            allowed_signals: Vec::new(),
            peers: Vec::new(),
            send_buffer: 1024 * 1024, // 1MB
            recv_buffer: 1024 * 1024, // 1MB
        }
    }
}

impl MeshConfig {
    /// Heartbeat period.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Check the record for values the mesh cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(Error::Config("node_id must not be empty".into()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(Error::Config("heartbeat interval must be positive".into()));
        }

        let mut names = HashSet::new();
        for peer in &self.peers {
            if peer.name.is_empty() || peer.host.is_empty() {
                return Err(Error::Config(format!("peer {:?} needs a name and host", peer)));
            }
            if peer.port == 0 {
                return Err(Error::Config(format!("peer '{}' has port 0", peer.name)));
            }
            if !names.insert(peer.name.as_str()) {
                return Err(Error::Config(format!("duplicate peer name '{}'", peer.name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_from_str() {
        let peer: Peer = "east=10.0.0.2:41234".parse().unwrap();
        assert_eq!(peer, Peer::new("east", "10.0.0.2", 41234));

        let peer: Peer = "v6=[::1]:9000".parse().unwrap();
        assert_eq!(peer.host, "::1");
        assert_eq!(peer.port, 9000);

        assert!("no-port=host".parse::<Peer>().is_err());
        assert!("host:1".parse::<Peer>().is_err());
        assert!("a=host:99999".parse::<Peer>().is_err());
        assert!("=host:1".parse::<Peer>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = MeshConfig::default();
        assert_eq!(config.bind.port(), DEFAULT_PORT);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: MeshConfig = serde_json::from_str(
            r#"{"node_id":"west","peers":[{"name":"east","host":"127.0.0.1","port":5000}]}"#,
        )
        .unwrap();
        assert_eq!(config.node_id, "west");
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.heartbeat_interval_ms, DEFAULT_HEARTBEAT_MS);
    }

    #[test]
    fn test_validate() {
        let mut config = MeshConfig {
            peers: vec![Peer::new("a", "127.0.0.1", 1), Peer::new("a", "127.0.0.1", 2)],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.peers.pop();
        config.heartbeat_interval_ms = 0;
        assert!(config.validate().is_err());

        config.heartbeat_interval_ms = 10;
        config.node_id = " ".into();
        assert!(config.validate().is_err());
    }
}
