//! Per-session idempotency window.
//!
//! Remembers the request ids of committed commands so a redelivered envelope
//! causes no second state transition. The window is bounded two ways: a
//! 60-second TTL (configurable) and a hard entry cap, pruned on insert.
//! Eviction never touches replica state - a command is processed the moment
//! its transition commits, whether or not its id is still cached.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Bounded set of recently committed request ids.
///
/// Owned by a single session task; no interior locking.
#[derive(Debug)]
pub struct IdempotencyCache {
    ttl: Duration,
    max_entries: usize,
    seen: HashMap<String, Instant>,
    order: VecDeque<String>,
}

impl IdempotencyCache {
    /// Create a window with the given TTL and entry cap.
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// True when `request_id` was recorded inside the window.
    #[must_use]
    pub fn contains(&mut self, request_id: &str) -> bool {
        self.prune(Instant::now());
        self.seen.contains_key(request_id)
    }

    /// Record a committed request id.
    pub fn record(&mut self, request_id: &str) {
        let now = Instant::now();
        self.prune(now);
        if self.seen.insert(request_id.to_string(), now).is_none() {
            self.order.push_back(request_id.to_string());
        }
    }

    /// Number of ids currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// True when the window holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Drop expired entries, then oldest entries over the cap.
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.order.front() {
            let expired = self
                .seen
                .get(front)
                .is_none_or(|at| now.duration_since(*at) >= self.ttl);
            let over_cap = self.seen.len() >= self.max_entries;
            if !expired && !over_cap {
                break;
            }
            let id = self.order.pop_front().unwrap_or_default();
            self.seen.remove(&id);
        }
    }
}
