//! Admission filter ("tumbler") between decode and dispatch.
//!
//! The mesh has no access control of its own, so this whitelist is the only
//! thing standing between an arbitrary UDP sender and the handlers. An empty
//! whitelist is the permissive mode: everything passes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::signal::{name_of, parse_code, SignalCode};

/// Cumulative filter counters since construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    /// Signals let through
    pub allowed: u64,
    /// Signals rejected by the whitelist
    pub blocked: u64,
    /// Allowed count per type, keyed by hex code (`0x04`)
    pub by_type: BTreeMap<String, u64>,
}

#[derive(Default)]
struct Counters {
    allowed: u64,
    blocked: u64,
    by_type: BTreeMap<SignalCode, u64>,
}

/// Whitelist gate over signal type codes.
pub struct Tumbler {
    allowed: BTreeSet<SignalCode>,
    counters: Mutex<Counters>,
}

impl Tumbler {
    /// Create a filter allowing exactly these codes. No codes means allow all.
    pub fn new(codes: impl IntoIterator<Item = SignalCode>) -> Self {
        Self {
            allowed: codes.into_iter().collect(),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Create a filter that lets every signal through.
    pub fn permissive() -> Self {
        Self::new(std::iter::empty())
    }

    /// Build from configuration strings (`"0x04"`, `"4"` or `"HEARTBEAT"`).
    pub fn from_config<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let mut codes = BTreeSet::new();
        for entry in entries {
            let entry = entry.as_ref();
            match parse_code(entry) {
                Some(code) if code != 0 => {
                    codes.insert(code);
                }
                _ => {
                    return Err(Error::Config(format!("invalid allowed signal '{entry}'")));
                }
            }
        }
        Ok(Self::new(codes))
    }

    /// Whether the filter is in allow-all mode.
    pub fn is_permissive(&self) -> bool {
        self.allowed.is_empty()
    }

    /// The configured whitelist, in code order.
    pub fn allowed_codes(&self) -> impl Iterator<Item = SignalCode> + '_ {
        self.allowed.iter().copied()
    }

    /// Decide whether a signal of this type may be dispatched, updating the
    /// counters.
    pub fn is_allowed(&self, code: SignalCode) -> bool {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);

        if self.allowed.is_empty() {
            counters.allowed += 1;
            return true;
        }

        if self.allowed.contains(&code) {
            counters.allowed += 1;
            *counters.by_type.entry(code).or_insert(0) += 1;
            true
        } else {
            counters.blocked += 1;
            debug!("Blocked signal {} (0x{:02X})", name_of(code), code);
            false
        }
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> FilterStats {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        FilterStats {
            allowed: counters.allowed,
            blocked: counters.blocked,
            by_type: counters
                .by_type
                .iter()
                .map(|(code, n)| (format!("0x{code:02X}"), *n))
                .collect(),
        }
    }
}

impl Default for Tumbler {
    fn default() -> Self {
        Self::permissive()
    }
}
