//! Warden Node binary
//!
//! A gatekeeper node on the Warden signal mesh.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_node::{NodeConfig, WardenNode};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warden_node=info,warden_mesh=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = NodeConfig::load()?;

    let node = WardenNode::new(config)?;
    node.run().await?;

    Ok(())
}
