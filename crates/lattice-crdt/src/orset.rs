//! Observed-remove set CRDT with add-wins semantics.
//!
//! Every add attaches a fresh `(author, seq)` tag to the element; an element
//! is present while it has at least one tag. Remove drops exactly the tags
//! observed at this replica, so a concurrent add elsewhere - whose tag the
//! remover never saw - survives the next merge. No tombstones are kept:
//! memory is bounded by live elements and their surviving tags.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Hand out process-unique tag sequence numbers.
///
/// Seeded from the wall clock so a restarted process does not reuse sequence
/// numbers already embedded in peer state.
fn next_seq() -> u64 {
    static COUNTER: OnceLock<AtomicU64> = OnceLock::new();
    COUNTER
        .get_or_init(|| AtomicU64::new(crate::register::wall_clock_us()))
        .fetch_add(1, Ordering::Relaxed)
}

/// A unique add tag: the authoring node plus a sequence number that node
/// never reuses.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub author: String,
    pub seq: u64,
}

impl Tag {
    /// Mint a fresh tag for `author`.
    #[must_use]
    pub fn fresh(author: &str) -> Self {
        Self {
            author: author.to_string(),
            seq: next_seq(),
        }
    }
}

/// An observed-remove set over string elements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrSet {
    elements: BTreeMap<String, BTreeSet<Tag>>,
}

impl OrSet {
    /// Create an empty set (the merge identity).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from wire entries, discarding elements with no tags.
    #[must_use]
    pub fn from_entries(entries: BTreeMap<String, BTreeSet<Tag>>) -> Self {
        let elements = entries
            .into_iter()
            .filter(|(_, tags)| !tags.is_empty())
            .collect();
        Self { elements }
    }

    /// True when the element carries at least one tag.
    #[must_use]
    pub fn contains(&self, element: &str) -> bool {
        self.elements.contains_key(element)
    }

    /// Number of present elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// True when no element is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Iterate over present elements in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.elements.keys().map(String::as_str)
    }

    /// Iterate over `(element, tags)` entries.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &BTreeSet<Tag>)> {
        self.elements.iter().map(|(e, tags)| (e.as_str(), tags))
    }

    /// Add `element` under a fresh tag authored by `node`.
    ///
    /// Adding an already-present element stacks another tag, which is what
    /// makes concurrent add/remove resolve add-wins.
    pub fn add(&mut self, element: &str, node: &str) -> Tag {
        let tag = Tag::fresh(node);
        self.elements
            .entry(element.to_string())
            .or_default()
            .insert(tag.clone());
        tag
    }

    /// Insert a specific tag (used by merge and the wire decoder).
    pub fn add_tag(&mut self, element: &str, tag: Tag) {
        self.elements
            .entry(element.to_string())
            .or_default()
            .insert(tag);
    }

    /// Remove `element` by dropping every tag observed at this replica.
    ///
    /// Author-agnostic. A tag added concurrently at another replica is not
    /// observed here and therefore survives the next merge.
    pub fn remove(&mut self, element: &str) {
        self.elements.remove(element);
    }

    /// Merge another set into this one: per-element union of tag sets.
    pub fn merge(&mut self, other: &Self) {
        for (element, tags) in &other.elements {
            let entry = self.elements.entry(element.clone()).or_default();
            for tag in tags {
                entry.insert(tag.clone());
            }
        }
    }

    /// The minimal set that merged into `older` yields `self`: every tag of
    /// `self` that `older` has not observed. Empty when `older` already
    /// holds all of them.
    #[must_use]
    pub fn delta_since(&self, older: &Self) -> Self {
        let mut delta = Self::new();
        for (element, tags) in &self.elements {
            let seen = older.elements.get(element);
            for tag in tags {
                if seen.is_none_or(|s| !s.contains(tag)) {
                    delta.add_tag(element, tag.clone());
                }
            }
        }
        delta
    }
}
