//! The replica registry - keyed CRDT storage with per-key pub/sub.
//!
//! One logical store of `key -> replica` plus `key -> subscribers`. All
//! single-key operations are serializable: each replica sits behind its own
//! mutex, and mutating operations broadcast the committed state to
//! subscribers while still inside the critical section, so notifications
//! leave in commit order.
//!
//! # Lock order
//!
//! 1. `replicas` shard lock (acquired by `.get()` / `.entry()`)
//! 2. per-key replica mutex
//! 3. `subscribers` shard lock (read-only during broadcast)
//!
//! Broadcast delivery is `try_send` and never blocks, so holding the
//! per-key mutex across it is bounded. Never touch a second key's mutex
//! while holding one.

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics;
use crate::state::subscriber::{Delivery, SessionId, StateUpdate, Subscriber};
use lattice_crdt::{encode, CrdtError, Replica, ReplicaKind};

/// Errors surfaced by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The key has no replica and the operation does not create one.
    #[error("no replica for key: {0}")]
    NotFound(String),

    /// Kind disagreement or malformed incoming state.
    #[error(transparent)]
    Crdt(#[from] CrdtError),
}

/// Concurrent keyed store of CRDT replicas with per-key subscriptions.
pub struct Registry {
    replicas: DashMap<String, Mutex<Replica>>,
    subscribers: DashMap<String, Vec<Subscriber>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            replicas: DashMap::new(),
            subscribers: DashMap::new(),
        }
    }

    /// Snapshot of the replica for `key`. Never creates.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Replica> {
        self.replicas.get(key).map(|entry| entry.lock().clone())
    }

    /// Atomically fetch the replica for `key`, installing `empty(kind)` if
    /// absent. Fails with `KindMismatch` when the key is already bound to a
    /// different kind.
    pub fn get_or_create(&self, key: &str, kind: ReplicaKind) -> Result<Replica, RegistryError> {
        let entry = self
            .replicas
            .entry(key.to_string())
            .or_insert_with(|| {
                metrics::inc_active_replicas();
                debug!(key = %key, kind = %kind.as_str(), "Replica created");
                Mutex::new(Replica::empty(kind))
            });
        let replica = entry.lock();
        if replica.kind() != kind {
            return Err(CrdtError::KindMismatch {
                expected: kind,
                actual: replica.kind(),
            }
            .into());
        }
        Ok(replica.clone())
    }

    /// Replace the replica for `key` (installing it if absent) and
    /// broadcast the new state.
    pub fn put(&self, key: &str, replica: Replica, origin: SessionId) -> Replica {
        let entry = self.replicas.entry(key.to_string()).or_insert_with(|| {
            metrics::inc_active_replicas();
            Mutex::new(replica.clone())
        });
        let mut guard = entry.lock();
        *guard = replica;
        let committed = guard.clone();
        self.broadcast(key, &committed, origin);
        committed
    }

    /// Atomically read-modify-write the replica for `key` under its
    /// critical section, then broadcast. Fails `NotFound` when absent.
    ///
    /// `f` is applied to a scratch copy and the result committed only on
    /// success, so a failing operation leaves no partial state.
    pub fn update<F>(&self, key: &str, origin: SessionId, f: F) -> Result<Replica, RegistryError>
    where
        F: FnOnce(&mut Replica) -> Result<(), CrdtError>,
    {
        let entry = self
            .replicas
            .get(key)
            .ok_or_else(|| RegistryError::NotFound(key.to_string()))?;
        let mut guard = entry.lock();
        let mut next = guard.clone();
        f(&mut next)?;
        *guard = next;
        let committed = guard.clone();
        self.broadcast(key, &committed, origin);
        Ok(committed)
    }

    /// Atomically merge `incoming` into the replica for `key`, installing
    /// it outright when the key is absent. Broadcasts the converged state.
    pub fn merge(
        &self,
        key: &str,
        incoming: &Replica,
        origin: SessionId,
    ) -> Result<Replica, RegistryError> {
        let entry = self.replicas.entry(key.to_string()).or_insert_with(|| {
            metrics::inc_active_replicas();
            debug!(key = %key, kind = %incoming.kind().as_str(), "Replica installed from merge");
            Mutex::new(Replica::empty(incoming.kind()))
        });
        let mut guard = entry.lock();
        let mut next = guard.clone();
        next.merge(incoming)?;
        *guard = next;
        let committed = guard.clone();
        self.broadcast(key, &committed, origin);
        Ok(committed)
    }

    /// The delta that brings `client_state` up to the current replica.
    pub fn delta(&self, key: &str, client_state: &Replica) -> Result<Replica, RegistryError> {
        let entry = self
            .replicas
            .get(key)
            .ok_or_else(|| RegistryError::NotFound(key.to_string()))?;
        let current = entry.lock();
        Ok(current.delta_since(client_state)?)
    }

    /// Add a subscriber for `key`. Idempotent per session.
    pub fn subscribe(&self, key: &str, subscriber: Subscriber) {
        let mut subs = self.subscribers.entry(key.to_string()).or_default();
        if !subs
            .iter()
            .any(|s| s.session_id() == subscriber.session_id())
        {
            subs.push(subscriber);
        }
    }

    /// Remove a session's subscription for `key`. Idempotent.
    pub fn unsubscribe(&self, key: &str, session_id: SessionId) {
        if let Some(mut subs) = self.subscribers.get_mut(key) {
            subs.retain(|s| s.session_id() != session_id);
            if subs.is_empty() {
                drop(subs);
                self.subscribers.remove_if(key, |_, v| v.is_empty());
            }
        }
    }

    /// Remove the replica and all subscribers for `key`.
    pub fn delete(&self, key: &str) {
        if self.replicas.remove(key).is_some() {
            metrics::dec_active_replicas();
        }
        self.subscribers.remove(key);
    }

    /// Snapshot of currently stored keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.replicas.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of stored replicas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    /// Number of subscribers for `key` (test and operator visibility).
    #[must_use]
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.subscribers.get(key).map_or(0, |s| s.len())
    }

    /// Deliver the committed state to every subscriber of `key`.
    ///
    /// Called inside the per-key critical section so notifications leave in
    /// commit order. Delivery is try_send per subscriber; dead subscribers
    /// are pruned in place.
    fn broadcast(&self, key: &str, committed: &Replica, origin: SessionId) {
        let Some(mut subs) = self.subscribers.get_mut(key) else {
            return;
        };
        let state = encode(committed);
        subs.retain(|subscriber| {
            let update = StateUpdate {
                key: key.to_string(),
                state: state.clone(),
                origin,
            };
            match subscriber.deliver(update) {
                Delivery::Sent => {
                    metrics::inc_broadcasts_delivered();
                    true
                }
                Delivery::Dropped => {
                    metrics::inc_broadcasts_dropped();
                    debug!(
                        key = %key,
                        node_id = %subscriber.node_id(),
                        "Broadcast dropped for slow subscriber"
                    );
                    true
                }
                Delivery::Dead => {
                    metrics::inc_broadcasts_dropped();
                    warn!(
                        key = %key,
                        node_id = %subscriber.node_id(),
                        "Removing dead subscriber"
                    );
                    false
                }
            }
        });
    }
}
