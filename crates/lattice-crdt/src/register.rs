//! Last-writer-wins register CRDT.
//!
//! Holds one opaque JSON payload together with the microsecond timestamp and
//! author of the write that produced it. Merge keeps the side with the larger
//! timestamp; timestamp ties fall back to lexicographic author comparison so
//! that any two replicas resolve the same way.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current wall clock in microseconds since the Unix epoch.
///
/// Clock monotonicity is best effort; correctness only needs the local
/// `set` path to never reuse a timestamp, which [`LwwRegister::set`]
/// guarantees by construction.
#[must_use]
pub fn wall_clock_us() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}

/// A last-writer-wins register.
///
/// The empty register is `(null, 0, "")`; the empty author string sorts
/// before every real node id, so it loses any tie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LwwRegister {
    value: Value,
    timestamp: u64,
    author: String,
}

impl Default for LwwRegister {
    fn default() -> Self {
        Self {
            value: Value::Null,
            timestamp: 0,
            author: String::new(),
        }
    }
}

impl LwwRegister {
    /// Create an unset register (the merge identity).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from wire fields.
    #[must_use]
    pub fn from_parts(value: Value, timestamp: u64, author: String) -> Self {
        Self {
            value,
            timestamp,
            author,
        }
    }

    /// The current payload (`null` when unset).
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Timestamp of the winning write, in microseconds.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Author of the winning write (empty when unset).
    #[must_use]
    pub fn author(&self) -> &str {
        &self.author
    }

    /// Assign a new payload authored by `node`.
    ///
    /// The write's timestamp is `max(current + 1, wall clock)`: a later write
    /// at the same replica can never tie with an earlier one, even when the
    /// wall clock stalls or steps backwards.
    pub fn set(&mut self, value: Value, node: &str) {
        self.timestamp = (self.timestamp + 1).max(wall_clock_us());
        self.value = value;
        self.author = node.to_string();
    }

    /// True when `other`'s write beats this register's write.
    fn loses_to(&self, other: &Self) -> bool {
        other.timestamp > self.timestamp
            || (other.timestamp == self.timestamp && other.author > self.author)
    }

    /// Merge another register into this one.
    ///
    /// Larger timestamp wins; ties break toward the lexicographically larger
    /// author. An exact `(timestamp, author)` tie keeps the receiving side,
    /// which is deterministic because equal coordinates mean the sides are
    /// interchangeable.
    pub fn merge(&mut self, other: &Self) {
        if self.loses_to(other) {
            *self = other.clone();
        }
    }

    /// The minimal register that merged into `older` yields `self`; the
    /// empty register when `older` already holds the winning write.
    #[must_use]
    pub fn delta_since(&self, older: &Self) -> Self {
        if older.loses_to(self) {
            self.clone()
        } else {
            Self::new()
        }
    }
}
