//! Wire codec for mesh signals.
//!
//! Outbound frames are always a single JSON document with short keys:
//!
//! ```text
//! { "t": <code>, "s": <sender>, "d": <payload>, "ts": <unix millis> }
//! ```
//!
//! Inbound decoding also accepts two older framings, tried in this order:
//!
//! 1. Fixed binary frame (12-byte header, all integers big-endian):
//!
//! ```text
//! [type u16] [reserved u16] [payload_len u32] [unix_secs u32] [JSON payload]
//! ```
//!
//! 2. Compact JSON `{t, s, d, ts}` (the canonical frame).
//! 3. Verbose JSON `{type, source, payload, timestamp}`.
//!
//! Decoding never fails loudly: anything that matches none of these yields
//! `None` and the caller drops the datagram.

use serde_json::{json, Map, Value};

use crate::signal::{now_millis, Signal, SignalCode, UNKNOWN_SENDER};

/// Size of the fixed binary frame header.
pub const BINARY_HEADER_LEN: usize = 12;

/// Encode a signal into the canonical JSON frame.
pub fn encode(signal: &Signal) -> Vec<u8> {
    let sender = if signal.sender.is_empty() {
        UNKNOWN_SENDER
    } else {
        signal.sender.as_str()
    };

    json!({
        "t": signal.code,
        "s": sender,
        "d": signal.payload,
        "ts": signal.timestamp,
    })
    .to_string()
    .into_bytes()
}

/// Decode a datagram, trying the binary frame first and then both JSON
/// framings.
pub fn decode(buf: &[u8]) -> Option<Signal> {
    decode_binary(buf).or_else(|| decode_json(buf))
}

fn decode_binary(buf: &[u8]) -> Option<Signal> {
    if buf.len() < BINARY_HEADER_LEN {
        return None;
    }

    let code = u16::from_be_bytes([buf[0], buf[1]]);
    if code == 0 || code > 0xFF {
        return None;
    }
    let payload_len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    let secs = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

    // Declared length must fit in what actually arrived
    let body = buf[BINARY_HEADER_LEN..].get(..payload_len)?;
    let payload: Value = serde_json::from_slice(body).ok()?;

    // The header type is authoritative; only the sender comes from the body
    let sender = sender_field(&payload, &["sender", "serverId"]);

    Some(Signal {
        code: code as SignalCode,
        sender,
        payload,
        timestamp: u64::from(secs) * 1000,
    })
}

fn decode_json(buf: &[u8]) -> Option<Signal> {
    let doc: Value = serde_json::from_slice(buf).ok()?;
    let obj = doc.as_object()?;
    decode_compact(obj).or_else(|| decode_verbose(obj))
}

fn decode_compact(obj: &Map<String, Value>) -> Option<Signal> {
    let code = coerce_code(obj.get("t")?)?;
    Some(Signal {
        code,
        sender: sender_field_of(obj, "s"),
        payload: obj.get("d").cloned().unwrap_or_else(empty_payload),
        timestamp: coerce_timestamp(obj.get("ts")),
    })
}

fn decode_verbose(obj: &Map<String, Value>) -> Option<Signal> {
    let code = coerce_code(obj.get("type")?)?;
    Some(Signal {
        code,
        sender: sender_field_of(obj, "source"),
        payload: obj.get("payload").cloned().unwrap_or_else(empty_payload),
        timestamp: coerce_timestamp(obj.get("timestamp")),
    })
}

fn empty_payload() -> Value {
    Value::Object(Map::new())
}

fn sender_field(payload: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| payload.get(*k).and_then(Value::as_str).filter(|s| !s.is_empty()))
        .unwrap_or(UNKNOWN_SENDER)
        .to_string()
}

fn sender_field_of(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_SENDER)
        .to_string()
}

/// Coerce a JSON type field to a code.
///
/// Non-numeric values become 0. Numeric values outside `0..=255` cannot be
/// a code, so the interpretation fails.
fn coerce_code(value: &Value) -> Option<SignalCode> {
    let n = match value {
        Value::Number(n) => match n.as_u64() {
            Some(n) => n,
            None => match n.as_f64() {
                Some(f) if f >= 0.0 && f.fract() == 0.0 => f as u64,
                _ => return None,
            },
        },
        Value::String(s) => {
            let s = s.trim();
            let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16),
                None => s.parse::<u64>(),
            };
            match parsed {
                Ok(n) => n,
                Err(_) => 0,
            }
        }
        _ => 0,
    };
    SignalCode::try_from(n).ok()
}

fn coerce_timestamp(value: Option<&Value>) -> u64 {
    value
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)))
        .unwrap_or_else(now_millis)
}
