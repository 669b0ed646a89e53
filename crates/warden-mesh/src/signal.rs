//! Signals and the registry of known signal codes.
//!
//! Codes are grouped by purpose:
//! - `0x01-0x0F`: Connection lifecycle
//! - `0x10-0x1F`: Health
//! - `0x20-0x2F`: Content lifecycle
//! - `0xE0-0xEF`: Errors
//!
//! The registry is closed, but the wire is not: any code in `1..=255` can
//! arrive, and unknown codes are carried through as plain numbers. Whether
//! such a signal is accepted is decided by the admission filter.

use std::borrow::Cow;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw signal type code as carried on the wire.
pub type SignalCode = u8;

/// Sender id substituted when a frame does not name its sender.
pub const UNKNOWN_SENDER: &str = "unknown";

/// Registered signal types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SignalKind {
    // Connection lifecycle (0x01-0x0F)
    ConnectRequest = 0x01,
    ConnectApprove = 0x02,
    ConnectReject = 0x03,
    Heartbeat = 0x04,
    Disconnect = 0x05,

    // Health (0x10-0x1F)
    HealthCheck = 0x10,
    HealthResponse = 0x11,

    // Content lifecycle (0x20-0x2F)
    ContentChecked = 0x20,
    ContentAdmitted = 0x21,
    ContentRejected = 0x22,

    // Errors (0xE0-0xEF)
    Error = 0xE0,
    CriticalError = 0xE1,
}

/// Name table, canonical names first. Aliases share the code of the
/// signal they follow.
const NAMES: &[(&str, SignalKind)] = &[
    ("CONNECT_REQUEST", SignalKind::ConnectRequest),
    ("CONNECT_APPROVE", SignalKind::ConnectApprove),
    ("CONNECT_REJECT", SignalKind::ConnectReject),
    ("HEARTBEAT", SignalKind::Heartbeat),
    ("DISCONNECT", SignalKind::Disconnect),
    ("HEALTH_CHECK", SignalKind::HealthCheck),
    ("HEALTH_RESPONSE", SignalKind::HealthResponse),
    ("CONTENT_CHECKED", SignalKind::ContentChecked),
    ("CONTENT_ADMITTED", SignalKind::ContentAdmitted),
    ("CONTENT_REJECTED", SignalKind::ContentRejected),
    ("ERROR", SignalKind::Error),
    ("CRITICAL_ERROR", SignalKind::CriticalError),
    // Aliases
    ("CONNECT_ACCEPT", SignalKind::ConnectApprove),
    ("CONNECT_DENY", SignalKind::ConnectReject),
    ("PING", SignalKind::Heartbeat),
    ("HEALTH_ACK", SignalKind::HealthResponse),
    ("CONTENT_APPROVED", SignalKind::ContentAdmitted),
    ("FATAL", SignalKind::CriticalError),
];

impl SignalKind {
    /// Alias of [`SignalKind::ConnectApprove`].
    pub const CONNECT_ACCEPT: Self = Self::ConnectApprove;
    /// Alias of [`SignalKind::ConnectReject`].
    pub const CONNECT_DENY: Self = Self::ConnectReject;
    /// Alias of [`SignalKind::Heartbeat`].
    pub const PING: Self = Self::Heartbeat;
    /// Alias of [`SignalKind::HealthResponse`].
    pub const HEALTH_ACK: Self = Self::HealthResponse;
    /// Alias of [`SignalKind::ContentAdmitted`].
    pub const CONTENT_APPROVED: Self = Self::ContentAdmitted;
    /// Alias of [`SignalKind::CriticalError`].
    pub const FATAL: Self = Self::CriticalError;

    /// Every registered signal, in code order.
    pub const ALL: [SignalKind; 12] = [
        Self::ConnectRequest,
        Self::ConnectApprove,
        Self::ConnectReject,
        Self::Heartbeat,
        Self::Disconnect,
        Self::HealthCheck,
        Self::HealthResponse,
        Self::ContentChecked,
        Self::ContentAdmitted,
        Self::ContentRejected,
        Self::Error,
        Self::CriticalError,
    ];

    /// Convert from a raw code.
    pub fn from_code(code: SignalCode) -> Option<Self> {
        match code {
            0x01 => Some(Self::ConnectRequest),
            0x02 => Some(Self::ConnectApprove),
            0x03 => Some(Self::ConnectReject),
            0x04 => Some(Self::Heartbeat),
            0x05 => Some(Self::Disconnect),
            0x10 => Some(Self::HealthCheck),
            0x11 => Some(Self::HealthResponse),
            0x20 => Some(Self::ContentChecked),
            0x21 => Some(Self::ContentAdmitted),
            0x22 => Some(Self::ContentRejected),
            0xE0 => Some(Self::Error),
            0xE1 => Some(Self::CriticalError),
            _ => None,
        }
    }

    /// Look up a signal by canonical name or alias (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        NAMES
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, kind)| *kind)
    }

    /// Raw wire code.
    pub fn code(self) -> SignalCode {
        self as u8
    }

    /// Canonical name.
    pub fn name(self) -> &'static str {
        NAMES
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(n, _)| *n)
            .unwrap_or("UNNAMED")
    }
}

impl From<SignalKind> for SignalCode {
    fn from(kind: SignalKind) -> Self {
        kind.code()
    }
}

/// Human-readable name for a code, for logs and metrics only.
///
/// Unregistered codes render as `UNKNOWN_0x` followed by the code in
/// uppercase hex.
pub fn name_of(code: SignalCode) -> Cow<'static, str> {
    match SignalKind::from_code(code) {
        Some(kind) => Cow::Borrowed(kind.name()),
        None => Cow::Owned(format!("UNKNOWN_0x{code:02X}")),
    }
}

/// Parse a code from configuration: `0x`-prefixed hex, decimal, or a
/// registered signal name.
pub fn parse_code(s: &str) -> Option<SignalCode> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u8::from_str_radix(hex, 16).ok();
    }
    if let Ok(code) = s.parse::<u8>() {
        return Some(code);
    }
    SignalKind::from_name(s).map(SignalKind::code)
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A typed unit of mesh communication.
///
/// Signals are built just before encoding or reconstructed from a datagram,
/// and are not modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    /// Type code (see [`SignalKind`])
    pub code: SignalCode,
    /// Id of the originating node
    pub sender: String,
    /// Handler-specific payload
    pub payload: Value,
    /// Production time in unix milliseconds (diagnostic only)
    pub timestamp: u64,
}

impl Signal {
    /// Create a signal stamped with the current time.
    pub fn new(code: impl Into<SignalCode>, sender: impl Into<String>, payload: Value) -> Self {
        Self {
            code: code.into(),
            sender: sender.into(),
            payload,
            timestamp: now_millis(),
        }
    }

    /// The registered kind, if this code is known.
    pub fn kind(&self) -> Option<SignalKind> {
        SignalKind::from_code(self.code)
    }

    /// Human-readable name of this signal's type.
    pub fn name(&self) -> Cow<'static, str> {
        name_of(self.code)
    }

    /// Look up a payload field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_name() {
        assert_eq!(name_of(0x04), "HEARTBEAT");
        assert_eq!(SignalKind::Heartbeat.code(), 0x04);
    }

    #[test]
    fn test_unknown_name() {
        let name = name_of(0x99);
        assert!(name.starts_with("UNKNOWN_0x"));
        assert_eq!(name, "UNKNOWN_0x99");
        assert_eq!(name_of(0xab), "UNKNOWN_0xAB");
    }

    #[test]
    fn test_codes_round_trip_through_registry() {
        for kind in SignalKind::ALL {
            assert_eq!(SignalKind::from_code(kind.code()), Some(kind));
            assert_eq!(SignalKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(SignalKind::from_code(0), None);
    }

    #[test]
    fn test_aliases_share_codes() {
        assert_eq!(SignalKind::PING, SignalKind::Heartbeat);
        assert_eq!(SignalKind::from_name("ping"), Some(SignalKind::Heartbeat));
        assert_eq!(SignalKind::from_name("CONTENT_APPROVED"), Some(SignalKind::ContentAdmitted));
        assert_eq!(SignalKind::FATAL.code(), 0xE1);
        // Aliases never replace the canonical name
        assert_eq!(SignalKind::ConnectApprove.name(), "CONNECT_APPROVE");
    }

    #[test]
    fn test_parse_code() {
        assert_eq!(parse_code("0x04"), Some(4));
        assert_eq!(parse_code("0X1f"), Some(0x1F));
        assert_eq!(parse_code(" 16 "), Some(16));
        assert_eq!(parse_code("heartbeat"), Some(4));
        assert_eq!(parse_code("256"), None);
        assert_eq!(parse_code("0x100"), None);
        assert_eq!(parse_code("bogus"), None);
    }

    #[test]
    fn test_signal_accessors() {
        let signal = Signal::new(SignalKind::ContentChecked, "node-a", serde_json::json!({"hash": "ab"}));
        assert_eq!(signal.kind(), Some(SignalKind::ContentChecked));
        assert_eq!(signal.name(), "CONTENT_CHECKED");
        assert_eq!(signal.field("hash"), Some(&serde_json::json!("ab")));
        assert!(signal.timestamp > 0);
    }
}
