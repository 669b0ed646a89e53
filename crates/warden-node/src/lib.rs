//! Warden Node - Content Admission Gatekeeper
//!
//! A gatekeeper node scores candidate content for redundancy, maps the score
//! to an admission decision, and tells its peers about the outcome over the
//! Warden signal mesh.
//!
//! # Architecture
//!
//! - **Config**: JSON file plus environment overrides
//! - **Gate**: three-cutoff threshold decision, fail-closed
//! - **Liveness**: staleness tracking from peer heartbeats
//! - **Node**: builds the mesh once and wires handlers to the workflow
//!
//! # Example
//!
//! ```no_run
//! use warden_node::{NodeConfig, WardenNode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::load()?;
//!     let node = WardenNode::new(config)?;
//!     node.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod gate;
pub mod liveness;
pub mod node;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use gate::{content_digest, Decision, Thresholds};
pub use liveness::PeerLiveness;
pub use node::{Verdict, WardenNode};
