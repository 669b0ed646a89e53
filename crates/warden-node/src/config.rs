//! Node configuration.
//!
//! An optional JSON file named by `WARDEN_CONFIG` is read first; environment
//! variables then override individual fields:
//!
//! | Variable                 | Field                          |
//! |--------------------------|--------------------------------|
//! | `WARDEN_NODE_ID`         | `mesh.node_id`                 |
//! | `WARDEN_BIND`            | `mesh.bind`                    |
//! | `WARDEN_HEARTBEAT_MS`    | `mesh.heartbeat_interval_ms`   |
//! | `WARDEN_ALLOWED_SIGNALS` | `mesh.allowed_signals` (comma) |
//! | `WARDEN_PEERS`           | `mesh.peers` (`name=host:port,...`) |
//! | `WARDEN_PEER_STALE_SECS` | `peer_stale_secs`              |
//! | `WARDEN_ADMIT_BELOW`     | `thresholds.admit_below`       |
//! | `WARDEN_NOTICE_BELOW`    | `thresholds.notice_below`      |
//! | `WARDEN_REJECT_AT`       | `thresholds.reject_at`         |

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_mesh::{MeshConfig, Peer};

use crate::error::{Error, Result};
use crate::gate::Thresholds;

/// Default window after which a silent peer counts as stale (three
/// heartbeat periods).
pub const DEFAULT_PEER_STALE_SECS: u64 = 90;

/// Configuration for a Warden node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Mesh endpoint, peers and admission filter
    pub mesh: MeshConfig,

    /// Gate cutoffs
    pub thresholds: Thresholds,

    /// Seconds without a heartbeat before a peer is reported stale
    pub peer_stale_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            mesh: MeshConfig::default(),
            thresholds: Thresholds::default(),
            peer_stale_secs: DEFAULT_PEER_STALE_SECS,
        }
    }
}

impl NodeConfig {
    /// Load from `WARDEN_CONFIG` (if set) and the environment, then validate.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("WARDEN_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Apply overrides from a variable lookup.
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = var("WARDEN_NODE_ID") {
            self.mesh.node_id = id;
        }
        if let Some(bind) = var("WARDEN_BIND") {
            self.mesh.bind = parse_var("WARDEN_BIND", &bind)?;
        }
        if let Some(ms) = var("WARDEN_HEARTBEAT_MS") {
            self.mesh.heartbeat_interval_ms = parse_var("WARDEN_HEARTBEAT_MS", &ms)?;
        }
        if let Some(list) = var("WARDEN_ALLOWED_SIGNALS") {
            self.mesh.allowed_signals = split_list(&list).map(str::to_string).collect();
        }
        if let Some(list) = var("WARDEN_PEERS") {
            self.mesh.peers = split_list(&list)
                .map(Peer::from_str)
                .collect::<std::result::Result<_, _>>()?;
        }
        if let Some(secs) = var("WARDEN_PEER_STALE_SECS") {
            self.peer_stale_secs = parse_var("WARDEN_PEER_STALE_SECS", &secs)?;
        }
        if let Some(v) = var("WARDEN_ADMIT_BELOW") {
            self.thresholds.admit_below = parse_var("WARDEN_ADMIT_BELOW", &v)?;
        }
        if let Some(v) = var("WARDEN_NOTICE_BELOW") {
            self.thresholds.notice_below = parse_var("WARDEN_NOTICE_BELOW", &v)?;
        }
        if let Some(v) = var("WARDEN_REJECT_AT") {
            self.thresholds.reject_at = parse_var("WARDEN_REJECT_AT", &v)?;
        }
        Ok(())
    }

    /// Check every section.
    pub fn validate(&self) -> Result<()> {
        self.mesh.validate()?;
        self.thresholds.validate()?;
        if self.peer_stale_secs == 0 {
            return Err(Error::Config("peer_stale_secs must be positive".into()));
        }
        Ok(())
    }

    /// Staleness window for peer liveness.
    pub fn peer_stale_after(&self) -> Duration {
        Duration::from_secs(self.peer_stale_secs)
    }
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid value for {name}: '{value}'")))
}
