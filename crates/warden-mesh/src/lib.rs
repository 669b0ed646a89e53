//! Warden Mesh - UDP signal exchange between gatekeeper nodes
//!
//! Independent Warden nodes tell each other about heartbeats, health and the
//! outcome of content checks by exchanging small typed signals over UDP.
//!
//! # Architecture
//!
//! - **Signal**: type code + sender + JSON payload + timestamp, and the
//!   closed registry of known codes
//! - **Codec**: canonical JSON frame out; binary and two JSON framings in
//! - **Tumbler**: whitelist admission filter with counters
//! - **Dispatch**: per-type handler table with failure isolation
//! - **MeshSocket**: UDP endpoint, static peers, receive loop, heartbeat
//!
//! The transport is unreliable and unauthenticated by nature. Signals may be
//! lost, duplicated or reordered, and any host that can reach the port can
//! send one; the admission filter is the only gate.
//!
//! # Example
//!
//! ```no_run
//! use warden_mesh::{MeshConfig, MeshSocket, Peer, SignalKind};
//!
//! #[tokio::main]
//! async fn main() -> warden_mesh::Result<()> {
//!     let config = MeshConfig {
//!         node_id: "west".into(),
//!         peers: vec![Peer::new("east", "10.0.0.2", 41234)],
//!         ..Default::default()
//!     };
//!     let mesh = MeshSocket::new(config)?;
//!     mesh.on(SignalKind::ContentRejected, |signal, _origin| {
//!         println!("{} rejected {}", signal.sender, signal.payload["hash"]);
//!         Ok(())
//!     });
//!     mesh.start().await?;
//!     mesh.content_checked("deadbeef", "admit", 0.12).await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod filter;
pub mod signal;
pub mod socket;
pub mod transport;

pub use config::{MeshConfig, Peer};
pub use dispatch::{DispatchRegistry, Handler, HandlerError, HandlerResult, RouteOutcome};
pub use error::{Error, Result};
pub use events::{
    ContentAdmitted, ContentChecked, ContentRejected, HealthCheck, HealthResponse, Heartbeat,
    SignalPayload,
};
pub use filter::{FilterStats, Tumbler};
pub use signal::{name_of, Signal, SignalCode, SignalKind};
pub use socket::{BroadcastReport, MeshSocket, SocketState};
