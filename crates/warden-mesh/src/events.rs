//! Typed payloads for registered signals.
//!
//! Payloads travel as plain JSON objects; these types give senders and
//! handlers a checked view of the fields. Unknown fields (such as the
//! `serverId` stamped on every outbound signal) are ignored on parse.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::signal::{Signal, SignalKind};

/// A payload bound to one signal type.
pub trait SignalPayload: Serialize + DeserializeOwned {
    /// The signal type this payload travels under.
    const KIND: SignalKind;

    /// Serialize into a signal payload.
    fn to_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parse from a received signal. Returns `None` if the type differs or
    /// the payload does not have the expected shape.
    fn from_signal(signal: &Signal) -> Option<Self> {
        if signal.code != Self::KIND.code() {
            return None;
        }
        serde_json::from_value(signal.payload.clone()).ok()
    }
}

/// Periodic liveness announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub server_id: String,
    /// Sender's clock, unix milliseconds
    pub time: u64,
}

impl SignalPayload for Heartbeat {
    const KIND: SignalKind = SignalKind::Heartbeat;
}

/// Request for a health report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Opaque correlation token echoed in the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl SignalPayload for HealthCheck {
    const KIND: SignalKind = SignalKind::HealthCheck;
}

/// Answer to a [`HealthCheck`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub listening: bool,
    pub peers: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl SignalPayload for HealthResponse {
    const KIND: SignalKind = SignalKind::HealthResponse;
}

/// A candidate was scored and a decision taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChecked {
    pub hash: String,
    pub decision: String,
    pub score: f64,
}

impl SignalPayload for ContentChecked {
    const KIND: SignalKind = SignalKind::ContentChecked;
}

/// A candidate was admitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentAdmitted {
    pub hash: String,
    pub score: f64,
}

impl SignalPayload for ContentAdmitted {
    const KIND: SignalKind = SignalKind::ContentAdmitted;
}

/// A candidate was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRejected {
    pub hash: String,
    pub reason: String,
    pub score: f64,
}

impl SignalPayload for ContentRejected {
    const KIND: SignalKind = SignalKind::ContentRejected;
}
