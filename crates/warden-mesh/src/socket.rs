//! Mesh socket - the UDP endpoint tying codec, filter and dispatch together.
//!
//! # Pipeline
//!
//! ```text
//! inbound:  datagram ─→ codec::decode ─→ Tumbler::is_allowed ─→ DispatchRegistry::route
//! outbound: send/broadcast ─→ codec::encode ─→ UDP datagram per peer
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ─→ Starting ─→ Listening ─→ Stopping ─→ Stopped
//!               │
//!               └─ bind failure ─→ Stopped
//! ```
//!
//! Delivery is fire-and-forget. A successful send means the datagram was
//! handed to the kernel, nothing more: there is no acknowledgment, ordering,
//! retry, or authentication on this transport.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::config::{MeshConfig, Peer};
use crate::dispatch::{DispatchRegistry, HandlerResult, RouteOutcome};
use crate::error::{Error, Result};
use crate::events::{ContentAdmitted, ContentChecked, ContentRejected, Heartbeat, SignalPayload};
use crate::filter::{FilterStats, Tumbler};
use crate::signal::{name_of, now_millis, Signal, SignalCode};
use crate::transport;

/// Lifecycle state of a [`MeshSocket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Stopped,
    Starting,
    Listening,
    Stopping,
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SocketState::Stopped => "stopped",
            SocketState::Starting => "starting",
            SocketState::Listening => "listening",
            SocketState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Result of a broadcast: which peers the datagram was written for, and
/// which failed.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

impl BroadcastReport {
    /// Whether every peer was written to.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outbound half: this node's identity and the static peer table.
struct Outbound {
    node_id: String,
    peers: Vec<Peer>,
}

impl Outbound {
    fn peer(&self, name: &str) -> Option<&Peer> {
        self.peers.iter().find(|p| p.name == name)
    }

    async fn send(
        &self,
        socket: &UdpSocket,
        peer_name: &str,
        code: SignalCode,
        data: Value,
    ) -> Result<usize> {
        let Some(peer) = self.peer(peer_name) else {
            warn!("Send of {} to unknown peer '{}' ignored", name_of(code), peer_name);
            return Err(Error::UnknownPeer(peer_name.to_string()));
        };

        let signal = Signal::new(code, self.node_id.clone(), stamp(&self.node_id, data));
        let frame = codec::encode(&signal);

        let result: std::io::Result<usize> = async {
            let target = resolve(socket, peer).await?;
            socket.send_to(&frame, target).await
        }
        .await;

        match result {
            Ok(n) => {
                debug!("Sent {} ({} bytes) to {}", signal.name(), n, peer.name);
                Ok(n)
            }
            Err(e) => {
                warn!(
                    "Failed to send {} to {} ({}:{}): {}",
                    signal.name(),
                    peer.name,
                    peer.host,
                    peer.port,
                    e
                );
                Err(Error::Io(e))
            }
        }
    }

    async fn broadcast(&self, socket: &UdpSocket, code: SignalCode, data: Value) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for peer in &self.peers {
            match self.send(socket, &peer.name, code, data.clone()).await {
                Ok(_) => report.delivered.push(peer.name.clone()),
                Err(e) => report.failed.push((peer.name.clone(), e)),
            }
        }
        report
    }
}

/// Merge this node's id into an outbound payload.
fn stamp(node_id: &str, data: Value) -> Value {
    let mut obj = match data {
        Value::Object(obj) => obj,
        Value::Null => Map::new(),
        other => {
            let mut obj = Map::new();
            obj.insert("data".to_string(), other);
            obj
        }
    };
    obj.insert("serverId".to_string(), Value::String(node_id.to_string()));
    Value::Object(obj)
}

/// Resolve a peer, preferring an address of the socket's own family.
async fn resolve(socket: &UdpSocket, peer: &Peer) -> std::io::Result<SocketAddr> {
    let local_v4 = socket.local_addr()?.is_ipv4();
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((peer.host.as_str(), peer.port))
        .await?
        .collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4() == local_v4)
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no address for {}:{}", peer.host, peer.port),
            )
        })
}

/// Decode, filter and route one datagram.
///
/// Returns `None` when the datagram was dropped before dispatch.
pub fn process_datagram(
    buf: &[u8],
    origin: SocketAddr,
    filter: &Tumbler,
    registry: &DispatchRegistry,
) -> Option<RouteOutcome> {
    let Some(signal) = codec::decode(buf) else {
        debug!("Dropped undecodable datagram ({} bytes) from {}", buf.len(), origin);
        return None;
    };

    if !filter.is_allowed(signal.code) {
        debug!("Filtered {} from {} ({})", signal.name(), signal.sender, origin);
        return None;
    }

    Some(registry.route(&signal, origin))
}

/// Pause after a failed receive so a persistent error cannot spin the loop.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(50);

async fn receive_loop(
    socket: Arc<UdpSocket>,
    filter: Arc<Tumbler>,
    registry: Arc<DispatchRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; transport::MAX_DATAGRAM];

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, origin)) => {
                    process_datagram(&buf[..len], origin, &filter, &registry);
                }
                Err(e) => {
                    warn!("Mesh UDP recv error: {}", e);
                    tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                }
            },
        }
    }

    debug!("Mesh receive loop stopped");
}

async fn heartbeat_loop(
    socket: Arc<UdpSocket>,
    outbound: Arc<Outbound>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    // First tick completes immediately: announce as soon as we are up
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let beat = Heartbeat {
                    server_id: outbound.node_id.clone(),
                    time: now_millis(),
                };
                let payload = match beat.to_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!("Failed to build heartbeat: {}", e);
                        continue;
                    }
                };
                let report = outbound.broadcast(&socket, Heartbeat::KIND.code(), payload).await;
                debug!(
                    "Heartbeat sent to {} peers ({} failed)",
                    report.delivered.len(),
                    report.failed.len()
                );
            }
        }
    }

    debug!("Heartbeat stopped");
}

/// Background tasks of a listening socket.
struct Running {
    shutdown: watch::Sender<bool>,
    receiver: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

/// A node's endpoint on the signal mesh.
///
/// Construct once at the composition point and share by `Arc`.
pub struct MeshSocket {
    bind: SocketAddr,
    send_buffer: usize,
    recv_buffer: usize,
    heartbeat_interval: Duration,
    outbound: Arc<Outbound>,
    filter: Arc<Tumbler>,
    registry: Arc<DispatchRegistry>,
    state: Mutex<SocketState>,
    /// Bound socket while listening; sends clone it out
    transport: Mutex<Option<Arc<UdpSocket>>>,
    /// Serializes start/stop and owns the background tasks
    lifecycle: tokio::sync::Mutex<Option<Running>>,
}

impl MeshSocket {
    /// Create a stopped socket from configuration.
    pub fn new(config: MeshConfig) -> Result<Self> {
        config.validate()?;
        let filter = Tumbler::from_config(config.allowed_signals.as_slice())?;

        if filter.is_permissive() {
            info!("Mesh admission filter is permissive (no allowed signals configured)");
        } else {
            info!(
                "Mesh admission filter allows: {}",
                filter.allowed_codes().map(|c| name_of(c).into_owned()).collect::<Vec<_>>().join(", ")
            );
        }

        Ok(Self {
            bind: config.bind,
            send_buffer: config.send_buffer,
            recv_buffer: config.recv_buffer,
            heartbeat_interval: config.heartbeat_interval(),
            outbound: Arc::new(Outbound {
                node_id: config.node_id,
                peers: config.peers,
            }),
            filter: Arc::new(filter),
            registry: Arc::new(DispatchRegistry::new()),
            state: Mutex::new(SocketState::Stopped),
            transport: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(None),
        })
    }

    /// This node's id.
    pub fn node_id(&self) -> &str {
        &self.outbound.node_id
    }

    /// The static peer table.
    pub fn peers(&self) -> &[Peer] {
        &self.outbound.peers
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SocketState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the receive loop is running.
    pub fn is_listening(&self) -> bool {
        self.state() == SocketState::Listening
    }

    /// Bound address while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket().and_then(|s| s.local_addr().ok())
    }

    /// Admission filter counters.
    pub fn stats(&self) -> FilterStats {
        self.filter.stats()
    }

    /// The dispatch registry (for bulk subscription management).
    pub fn registry(&self) -> &Arc<DispatchRegistry> {
        &self.registry
    }

    /// Subscribe a handler to a signal type.
    pub fn on<F>(&self, code: impl Into<SignalCode>, handler: F)
    where
        F: Fn(&Signal, SocketAddr) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry.register(code, handler);
    }

    /// Set the handler for signal types nobody subscribed to.
    pub fn set_default_handler<F>(&self, handler: F)
    where
        F: Fn(&Signal, SocketAddr) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry.set_default(handler);
    }

    fn set_state(&self, state: SocketState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        debug!("Mesh socket {}", state);
    }

    fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Bind the UDP port and start the receive loop and heartbeat.
    ///
    /// Returns the bound address. A bind failure leaves the socket stopped.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut lifecycle = self.lifecycle.lock().await;

        let current = self.state();
        if current != SocketState::Stopped {
            return Err(Error::InvalidState {
                expected: "stopped",
                actual: current,
            });
        }
        self.set_state(SocketState::Starting);

        let bound = transport::bind(self.bind, self.send_buffer, self.recv_buffer)
            .and_then(|socket| socket.local_addr().map(|addr| (socket, addr)));
        let (socket, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                error!("Mesh bind on {} failed: {}", self.bind, source);
                self.set_state(SocketState::Stopped);
                return Err(Error::Bind {
                    addr: self.bind,
                    source,
                });
            }
        };
        let socket = Arc::new(socket);

        let (shutdown, shutdown_rx) = watch::channel(false);

        let receiver = tokio::spawn(receive_loop(
            Arc::clone(&socket),
            Arc::clone(&self.filter),
            Arc::clone(&self.registry),
            shutdown_rx.clone(),
        ));
        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::clone(&socket),
            Arc::clone(&self.outbound),
            self.heartbeat_interval,
            shutdown_rx,
        ));

        *self.transport.lock().unwrap_or_else(PoisonError::into_inner) = Some(socket);
        *lifecycle = Some(Running {
            shutdown,
            receiver,
            heartbeat,
        });
        self.set_state(SocketState::Listening);

        info!(
            "Mesh node {} listening on {} ({} peers)",
            self.outbound.node_id,
            local_addr,
            self.outbound.peers.len()
        );
        Ok(local_addr)
    }

    /// Stop listening: clear handlers, stop the heartbeat, then close the
    /// UDP binding. Stopping a stopped socket does nothing.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(running) = lifecycle.take() else {
            return;
        };

        self.set_state(SocketState::Stopping);
        self.registry.clear();

        // No new sends from callers from here on
        let socket = self.transport.lock().unwrap_or_else(PoisonError::into_inner).take();

        let _ = running.shutdown.send(true);
        // Heartbeat must be gone before the socket closes
        if let Err(e) = running.heartbeat.await {
            warn!("Heartbeat task ended abnormally: {}", e);
        }
        if let Err(e) = running.receiver.await {
            warn!("Receive task ended abnormally: {}", e);
        }

        // Last reference: closes the binding
        drop(socket);

        self.set_state(SocketState::Stopped);
        info!("Mesh node {} stopped", self.outbound.node_id);
    }

    /// Send one signal to a named peer. Returns the bytes written.
    pub async fn send(&self, peer: &str, code: impl Into<SignalCode>, data: Value) -> Result<usize> {
        let socket = self.socket().ok_or(Error::NotListening)?;
        self.outbound.send(&socket, peer, code.into(), data).await
    }

    /// Send one signal to every configured peer, in table order. A failed
    /// peer does not stop the others.
    pub async fn broadcast(&self, code: impl Into<SignalCode>, data: Value) -> Result<BroadcastReport> {
        let socket = self.socket().ok_or(Error::NotListening)?;
        Ok(self.outbound.broadcast(&socket, code.into(), data).await)
    }

    /// Send a typed payload to a named peer.
    pub async fn send_event<E: SignalPayload>(&self, peer: &str, event: &E) -> Result<usize> {
        self.send(peer, E::KIND, event.to_payload()?).await
    }

    /// Broadcast a typed payload.
    pub async fn broadcast_event<E: SignalPayload>(&self, event: &E) -> Result<BroadcastReport> {
        self.broadcast(E::KIND, event.to_payload()?).await
    }

    /// Announce a completed check.
    pub async fn content_checked(
        &self,
        hash: impl Into<String>,
        decision: impl Into<String>,
        score: f64,
    ) -> Result<BroadcastReport> {
        self.broadcast_event(&ContentChecked {
            hash: hash.into(),
            decision: decision.into(),
            score,
        })
        .await
    }

    /// Announce an admission.
    pub async fn content_admitted(&self, hash: impl Into<String>, score: f64) -> Result<BroadcastReport> {
        self.broadcast_event(&ContentAdmitted {
            hash: hash.into(),
            score,
        })
        .await
    }

    /// Announce a rejection.
    pub async fn content_rejected(
        &self,
        hash: impl Into<String>,
        reason: impl Into<String>,
        score: f64,
    ) -> Result<BroadcastReport> {
        self.broadcast_event(&ContentRejected {
            hash: hash.into(),
            reason: reason.into(),
            score,
        })
        .await
    }
}

impl Drop for MeshSocket {
    fn drop(&mut self) {
        if let Some(running) = self.lifecycle.get_mut().take() {
            let _ = running.shutdown.send(true);
            running.heartbeat.abort();
            running.receiver.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SignalKind;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn free_port() -> u16 {
        std::net::UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn config(node_id: &str, port: u16, peers: Vec<Peer>) -> MeshConfig {
        MeshConfig {
            node_id: node_id.to_string(),
            bind: SocketAddr::from(([127, 0, 0, 1], port)),
            heartbeat_interval_ms: 3_600_000,
            peers,
            ..Default::default()
        }
    }

    /// Two sockets configured as each other's only peer.
    fn pair() -> (MeshSocket, MeshSocket) {
        let (port_a, port_b) = (free_port(), free_port());
        let a = MeshSocket::new(config("node-a", port_a, vec![Peer::new("node-b", "127.0.0.1", port_b)])).unwrap();
        let b = MeshSocket::new(config("node-b", port_b, vec![Peer::new("node-a", "127.0.0.1", port_a)])).unwrap();
        (a, b)
    }

    async fn recv_signal(raw: &UdpSocket, wait: Duration) -> Option<Signal> {
        let mut buf = vec![0u8; 4096];
        let (len, _) = timeout(wait, raw.recv_from(&mut buf)).await.ok()?.ok()?;
        codec::decode(&buf[..len])
    }

    #[test]
    fn test_stamp() {
        assert_eq!(stamp("a", json!({"x": 1})), json!({"x": 1, "serverId": "a"}));
        assert_eq!(stamp("a", json!({"serverId": "spoof"})), json!({"serverId": "a"}));
        assert_eq!(stamp("a", Value::Null), json!({"serverId": "a"}));
        assert_eq!(stamp("a", json!([1, 2])), json!({"data": [1, 2], "serverId": "a"}));
    }

    #[test]
    fn test_process_datagram() {
        let filter = Tumbler::new([SignalKind::Heartbeat.code()]);
        let registry = DispatchRegistry::new();
        registry.register(SignalKind::Heartbeat, |_, _| Ok(()));
        let origin: SocketAddr = "127.0.0.1:1".parse().unwrap();

        let beat = codec::encode(&Signal::new(SignalKind::Heartbeat, "x", json!({})));
        let check = codec::encode(&Signal::new(SignalKind::HealthCheck, "x", json!({})));

        assert_eq!(
            process_datagram(&beat, origin, &filter, &registry),
            Some(RouteOutcome::Handled { invoked: 1, failed: 0 })
        );
        assert_eq!(process_datagram(&check, origin, &filter, &registry), None);
        assert_eq!(process_datagram(b"\xff\xfe", origin, &filter, &registry), None);

        let stats = filter.stats();
        assert_eq!((stats.allowed, stats.blocked), (1, 1));
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let socket = MeshSocket::new(config("solo", 0, vec![])).unwrap();
        assert_eq!(socket.state(), SocketState::Stopped);
        assert!(socket.local_addr().is_none());

        let addr = socket.start().await.unwrap();
        assert!(socket.is_listening());
        assert_eq!(socket.local_addr(), Some(addr));

        assert!(matches!(
            socket.start().await,
            Err(Error::InvalidState { actual: SocketState::Listening, .. })
        ));

        socket.stop().await;
        assert_eq!(socket.state(), SocketState::Stopped);
        assert!(socket.local_addr().is_none());

        // Stopping twice is harmless, and the socket can start again
        socket.stop().await;
        socket.start().await.unwrap();
        socket.stop().await;
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let holder = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = holder.local_addr().unwrap().port();

        let socket = MeshSocket::new(config("late", port, vec![])).unwrap();
        assert!(matches!(socket.start().await, Err(Error::Bind { .. })));
        assert_eq!(socket.state(), SocketState::Stopped);
    }

    #[tokio::test]
    async fn test_send_requires_listening_and_known_peer() {
        let socket = MeshSocket::new(config("a", 0, vec![Peer::new("b", "127.0.0.1", free_port())])).unwrap();
        assert!(matches!(
            socket.send("b", SignalKind::Heartbeat, json!({})).await,
            Err(Error::NotListening)
        ));

        socket.start().await.unwrap();
        assert!(matches!(
            socket.send("nobody", SignalKind::Heartbeat, json!({})).await,
            Err(Error::UnknownPeer(name)) if name == "nobody"
        ));
        assert!(socket.send("b", SignalKind::Heartbeat, json!({})).await.unwrap() > 0);
        socket.stop().await;
    }

    #[tokio::test]
    async fn test_content_checked_end_to_end() {
        let (a, b) = pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        b.on(SignalKind::ContentChecked, move |signal, _| {
            tx.send(signal.clone())?;
            Ok(())
        });

        b.start().await.unwrap();
        a.start().await.unwrap();

        let report = a.content_checked("deadbeef", "admit", 0.25).await.unwrap();
        assert_eq!(report.delivered, vec!["node-b".to_string()]);
        assert!(report.is_complete());

        let signal = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(signal.sender, "node-a");
        let event = ContentChecked::from_signal(&signal).unwrap();
        assert_eq!(event.hash, "deadbeef");
        assert_eq!(event.decision, "admit");
        assert_eq!(event.score, 0.25);
        assert_eq!(signal.payload["serverId"], json!("node-a"));

        a.stop().await;
        b.stop().await;
    }

    #[tokio::test]
    async fn test_filtered_signal_never_reaches_handler() {
        let (port_a, port_b) = (free_port(), free_port());
        let a = MeshSocket::new(config("node-a", port_a, vec![Peer::new("node-b", "127.0.0.1", port_b)])).unwrap();
        let mut b_config = config("node-b", port_b, vec![]);
        b_config.allowed_signals = vec!["HEARTBEAT".to_string()];
        let b = MeshSocket::new(b_config).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        b.set_default_handler(move |_, _| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        b.start().await.unwrap();
        a.start().await.unwrap();
        a.content_rejected("cafe", "duplicate", 0.99).await.unwrap();

        // The initial heartbeat is allowed; the rejection is not
        let stats = timeout(WAIT, async {
            loop {
                let stats = b.stats();
                if stats.blocked >= 1 && hits.load(Ordering::SeqCst) >= 1 {
                    return stats;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(stats.allowed, 1);
        assert_eq!(stats.blocked, 1);
        assert_eq!(stats.by_type.get("0x04"), Some(&1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        a.stop().await;
        b.stop().await;
    }

    #[tokio::test]
    async fn test_legacy_binary_frame_is_dispatched() {
        let port = free_port();
        let socket = MeshSocket::new(config("node-a", port, vec![])).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        socket.on(SignalKind::ContentAdmitted, move |signal, _| {
            tx.send(signal.clone())?;
            Ok(())
        });
        socket.start().await.unwrap();

        let body = br#"{"serverId":"legacy","hash":"ab","score":0.1}"#;
        let mut frame = Vec::new();
        frame.extend_from_slice(&0x21u16.to_be_bytes());
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&1_700_000_000u32.to_be_bytes());
        frame.extend_from_slice(body);

        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(&frame, ("127.0.0.1", port)).await.unwrap();

        let signal = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(signal.sender, "legacy");
        assert_eq!(signal.timestamp, 1_700_000_000_000);
        assert_eq!(ContentAdmitted::from_signal(&signal).unwrap().hash, "ab");

        socket.stop().await;
    }

    #[tokio::test]
    async fn test_broadcast_continues_past_failed_peer() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let socket = MeshSocket::new(config(
            "node-a",
            0,
            vec![
                // IPv6 target from an IPv4 socket fails at the send
                Peer::new("bogus", "::1", 41234),
                Peer::new("good", "127.0.0.1", port),
            ],
        ))
        .unwrap();
        socket.start().await.unwrap();

        // Drain the initial heartbeat
        recv_signal(&listener, WAIT).await.unwrap();

        let report = socket.broadcast(SignalKind::Error, json!({"msg": "x"})).await.unwrap();
        assert_eq!(report.delivered, vec!["good".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "bogus");

        let signal = recv_signal(&listener, WAIT).await.unwrap();
        assert_eq!(signal.code, SignalKind::Error.code());

        socket.stop().await;
    }

    #[tokio::test]
    async fn test_heartbeat_stops_with_socket() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut cfg = config("node-a", 0, vec![Peer::new("watcher", "127.0.0.1", port)]);
        cfg.heartbeat_interval_ms = 50;
        let socket = MeshSocket::new(cfg).unwrap();

        socket.start().await.unwrap();

        // Initial beat arrives right away, then periodically
        for _ in 0..2 {
            let beat = recv_signal(&listener, WAIT).await.unwrap();
            assert_eq!(beat.kind(), Some(SignalKind::Heartbeat));
            let beat = Heartbeat::from_signal(&beat).unwrap();
            assert_eq!(beat.server_id, "node-a");
        }

        socket.stop().await;

        // Anything already in flight, then silence
        while recv_signal(&listener, Duration::from_millis(100)).await.is_some() {}
        assert!(recv_signal(&listener, Duration::from_millis(300)).await.is_none());
    }

    #[tokio::test]
    async fn test_stopped_socket_ignores_datagrams() {
        let (a, b) = pair();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        b.on(SignalKind::ContentChecked, move |_, _| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let b_addr = b.start().await.unwrap();
        a.start().await.unwrap();

        // Live first, so the counters are known to move
        a.content_checked("feed", "admit", 0.0).await.unwrap();
        timeout(WAIT, async {
            while hits.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        b.stop().await;
        assert_eq!(b.registry().handler_count(SignalKind::ContentChecked), 0);
        let before = b.stats();

        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let frame = codec::encode(&Signal::new(SignalKind::ContentChecked, "raw", json!({})));
        let _ = raw.send_to(&frame, b_addr).await;
        a.content_checked("feed", "admit", 0.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let after = b.stats();
        assert_eq!(after.allowed + after.blocked, before.allowed + before.blocked);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        a.stop().await;
    }
}
