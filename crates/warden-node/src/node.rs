//! Warden Node - composition point for the gatekeeper.
//!
//! Architecture:
//! - One [`MeshSocket`] per node, built here and shared by `Arc`
//! - Mesh handlers never do work themselves: they forward inbound signals
//!   over a channel to a single inbound task that owns liveness tracking and
//!   answers health checks
//! - [`WardenNode::submit`] runs the gate and announces the outcome

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use warden_mesh::{
    BroadcastReport, ContentAdmitted, ContentChecked, ContentRejected, FilterStats, HealthCheck,
    HealthResponse, MeshSocket, Signal, SignalKind, SignalPayload,
};

use crate::config::NodeConfig;
use crate::error::Result;
use crate::gate::{content_digest, effective_score, Decision};
use crate::liveness::PeerLiveness;

/// Signals the node subscribes to.
const SUBSCRIBED: [SignalKind; 7] = [
    SignalKind::Heartbeat,
    SignalKind::HealthCheck,
    SignalKind::ContentChecked,
    SignalKind::ContentAdmitted,
    SignalKind::ContentRejected,
    SignalKind::Error,
    SignalKind::CriticalError,
];

type Inbound = (Signal, SocketAddr);

/// Inbound signals waiting for the node task; beyond this they are dropped.
const INBOUND_QUEUE: usize = 1024;

/// Result of running one candidate through the gate.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub hash: String,
    pub score: f64,
    pub decision: Decision,
}

/// A Warden node instance.
pub struct WardenNode {
    config: NodeConfig,
    mesh: Arc<MeshSocket>,
    liveness: Arc<RwLock<PeerLiveness>>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Inbound>>>,
    inbound_task: Mutex<Option<JoinHandle<()>>>,
}

impl WardenNode {
    /// Build the node and subscribe its handlers. Nothing is bound yet.
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;

        let mesh = Arc::new(MeshSocket::new(config.mesh.clone())?);
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE);

        for kind in SUBSCRIBED {
            let tx = tx.clone();
            mesh.on(kind, move |signal, origin| {
                match tx.try_send((signal.clone(), origin)) {
                    Ok(()) => Ok(()),
                    Err(TrySendError::Full(_)) => {
                        warn!("Inbound queue full, dropped {} from {}", signal.name(), origin);
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            });
        }
        mesh.set_default_handler(|signal, origin| {
            debug!("Unhandled {} from {} ({})", signal.name(), signal.sender, origin);
            Ok(())
        });

        let liveness = PeerLiveness::new(config.peer_stale_after());

        Ok(Self {
            config,
            mesh,
            liveness: Arc::new(RwLock::new(liveness)),
            inbound_rx: Mutex::new(Some(rx)),
            inbound_task: Mutex::new(None),
        })
    }

    /// The node's mesh socket.
    pub fn mesh(&self) -> &Arc<MeshSocket> {
        &self.mesh
    }

    /// The loaded configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Admission filter counters, for health endpoints.
    pub fn stats(&self) -> FilterStats {
        self.mesh.stats()
    }

    /// Start the mesh and the inbound task.
    ///
    /// A node starts once: [`shutdown`](Self::shutdown) drops its
    /// subscriptions.
    pub async fn start(&self) -> Result<SocketAddr> {
        let addr = self.mesh.start().await?;

        let rx = self.inbound_rx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(rx) = rx {
            let task = tokio::spawn(inbound_loop(
                Arc::clone(&self.mesh),
                Arc::clone(&self.liveness),
                rx,
            ));
            *self.inbound_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        } else {
            warn!("Node restarted without subscriptions; inbound signals will be dropped");
        }

        Ok(addr)
    }

    /// Stop the mesh and wait for the inbound task to drain.
    pub async fn shutdown(&self) {
        self.mesh.stop().await;

        // Clearing the registry dropped every sender, so the task ends
        let task = self.inbound_task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Inbound task ended abnormally: {}", e);
            }
        }
    }

    /// Run until Ctrl-C, then shut down.
    pub async fn run(&self) -> Result<()> {
        info!("Warden node {} starting", self.config.mesh.node_id);
        info!("  Mesh: {}", self.config.mesh.bind);
        info!("  Peers: {}", self.config.mesh.peers.len());
        info!(
            "  Thresholds: admit<{} notice<{} reject>={}",
            self.config.thresholds.admit_below,
            self.config.thresholds.notice_below,
            self.config.thresholds.reject_at
        );

        self.start().await?;
        tokio::signal::ctrl_c().await?;
        info!("Shutdown requested");
        self.shutdown().await;
        Ok(())
    }

    /// Gate a candidate and announce the outcome to every peer.
    ///
    /// `score` is the redundancy scorer's answer; `None` (scorer unavailable)
    /// fails closed.
    pub async fn submit(&self, content: &[u8], score: Option<f64>) -> Result<Verdict> {
        let hash = content_digest(content);
        if score.is_none() {
            warn!("No redundancy score for {}, failing closed", hash);
        }
        let score = effective_score(score);
        let decision = self.config.thresholds.decide(score);
        info!("Content {} scored {:.3}: {}", hash, score, decision);

        let report = self.mesh.content_checked(&hash, decision.as_str(), score).await?;
        log_report(SignalKind::ContentChecked, &report);

        if decision.is_admitted() {
            let report = self.mesh.content_admitted(&hash, score).await?;
            log_report(SignalKind::ContentAdmitted, &report);
        } else if decision == Decision::Reject {
            let report = self.mesh.content_rejected(&hash, "redundant", score).await?;
            log_report(SignalKind::ContentRejected, &report);
        }

        Ok(Verdict {
            hash,
            score,
            decision,
        })
    }

    /// Peers whose heartbeat is recent.
    pub async fn live_peers(&self) -> Vec<String> {
        self.liveness.read().await.alive(Instant::now())
    }

    /// Peers that have gone quiet.
    pub async fn stale_peers(&self) -> Vec<String> {
        self.liveness.read().await.stale(Instant::now())
    }
}

fn is_peer(mesh: &MeshSocket, name: &str) -> bool {
    mesh.peers().iter().any(|p| p.name == name)
}

fn log_report(kind: SignalKind, report: &BroadcastReport) {
    for (peer, e) in &report.failed {
        warn!("{} not sent to {}: {}", kind.name(), peer, e);
    }
}

async fn inbound_loop(
    mesh: Arc<MeshSocket>,
    liveness: Arc<RwLock<PeerLiveness>>,
    mut rx: mpsc::Receiver<Inbound>,
) {
    while let Some((signal, origin)) = rx.recv().await {
        handle_inbound(&mesh, &liveness, signal, origin).await;
    }
    debug!("Inbound task stopped");
}

async fn handle_inbound(
    mesh: &MeshSocket,
    liveness: &RwLock<PeerLiveness>,
    signal: Signal,
    origin: SocketAddr,
) {
    let Some(kind) = signal.kind() else {
        return;
    };

    match kind {
        SignalKind::Heartbeat => {
            // Only configured peers are tracked, keyed by peer name
            if !is_peer(mesh, &signal.sender) {
                debug!("Heartbeat from unlisted sender {} ({})", signal.sender, origin);
                return;
            }
            liveness.write().await.record(&signal.sender, Instant::now());
            debug!("Heartbeat from {}", signal.sender);
        }
        SignalKind::HealthCheck => {
            let check = HealthCheck::from_signal(&signal).unwrap_or_default();
            // Replies go by peer name; an unlisted sender cannot be answered
            if !is_peer(mesh, &signal.sender) {
                debug!("Health check from unlisted sender {} ({})", signal.sender, origin);
                return;
            }
            let response = HealthResponse {
                status: "ok".to_string(),
                listening: mesh.is_listening(),
                peers: mesh.peers().len(),
                nonce: check.nonce,
            };
            if let Err(e) = mesh.send_event(&signal.sender, &response).await {
                warn!("Health response to {} failed: {}", signal.sender, e);
            }
        }
        SignalKind::ContentChecked => {
            if let Some(event) = ContentChecked::from_signal(&signal) {
                info!(
                    "Peer {} checked {}: {} ({:.3})",
                    signal.sender, event.hash, event.decision, event.score
                );
            }
        }
        SignalKind::ContentAdmitted => {
            if let Some(event) = ContentAdmitted::from_signal(&signal) {
                info!("Peer {} admitted {} ({:.3})", signal.sender, event.hash, event.score);
            }
        }
        SignalKind::ContentRejected => {
            if let Some(event) = ContentRejected::from_signal(&signal) {
                info!(
                    "Peer {} rejected {}: {} ({:.3})",
                    signal.sender, event.hash, event.reason, event.score
                );
            }
        }
        SignalKind::Error => {
            warn!("Peer {} reported error: {}", signal.sender, signal.payload);
        }
        SignalKind::CriticalError => {
            error!("Peer {} reported critical error: {}", signal.sender, signal.payload);
        }
        _ => {}
    }
}
