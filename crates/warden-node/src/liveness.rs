//! Receiver-side peer liveness.
//!
//! Heartbeats are one-way announcements; deciding that a peer has gone
//! quiet is up to whoever receives them.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Last heartbeat seen per sender id.
#[derive(Debug)]
pub struct PeerLiveness {
    stale_after: Duration,
    last_seen: HashMap<String, Instant>,
}

impl PeerLiveness {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            stale_after,
            last_seen: HashMap::new(),
        }
    }

    /// Record a heartbeat from `sender` at `at`.
    pub fn record(&mut self, sender: &str, at: Instant) {
        match self.last_seen.get_mut(sender) {
            Some(seen) => *seen = (*seen).max(at),
            None => {
                self.last_seen.insert(sender.to_string(), at);
            }
        }
    }

    /// Whether `sender` has been heard from within the window.
    pub fn is_alive(&self, sender: &str, now: Instant) -> bool {
        self.last_seen
            .get(sender)
            .is_some_and(|seen| now.saturating_duration_since(*seen) <= self.stale_after)
    }

    /// Senders heard from within the window, sorted.
    pub fn alive(&self, now: Instant) -> Vec<String> {
        self.partition(now, true)
    }

    /// Senders seen before but silent for longer than the window, sorted.
    pub fn stale(&self, now: Instant) -> Vec<String> {
        self.partition(now, false)
    }

    fn partition(&self, now: Instant, alive: bool) -> Vec<String> {
        let mut ids: Vec<String> = self
            .last_seen
            .keys()
            .filter(|id| self.is_alive(id, now) == alive)
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Number of senders ever seen.
    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staleness() {
        let start = Instant::now();
        let mut liveness = PeerLiveness::new(Duration::from_secs(90));
        liveness.record("east", start);
        liveness.record("west", start + Duration::from_secs(60));

        let now = start + Duration::from_secs(100);
        assert!(!liveness.is_alive("east", now));
        assert!(liveness.is_alive("west", now));
        assert!(!liveness.is_alive("north", now));
        assert_eq!(liveness.alive(now), vec!["west".to_string()]);
        assert_eq!(liveness.stale(now), vec!["east".to_string()]);
    }

    #[test]
    fn test_out_of_order_heartbeats_keep_latest() {
        let start = Instant::now();
        let mut liveness = PeerLiveness::new(Duration::from_secs(10));
        liveness.record("east", start + Duration::from_secs(20));
        liveness.record("east", start);

        assert!(liveness.is_alive("east", start + Duration::from_secs(25)));
        assert_eq!(liveness.len(), 1);
    }
}
