//! Send-side subscriber handles for broadcast delivery.
//!
//! A subscriber is the registry's view of a session: a bounded channel
//! sender plus identity. Delivery never blocks; a full queue drops the
//! update (the session catches up from a later broadcast or a sync) and a
//! closed queue marks the subscriber dead so the registry can prune it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Opaque per-session identifier, used to suppress broadcast echo.
pub type SessionId = Uuid;

/// One converged-state notification.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    /// Key whose replica changed.
    pub key: String,
    /// Encoded wire state after the transition.
    pub state: Value,
    /// Session whose command caused the transition; its own reply already
    /// carries the state, so delivery to it is skipped.
    pub origin: SessionId,
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Queue full: the update was dropped for this subscriber.
    Dropped,
    /// Receiver gone: the subscriber must be removed.
    Dead,
}

/// Consecutive drops after which a subscriber is treated as dead. A session
/// that stalls this long is not keeping up with its own profile cadence.
const MAX_CONSECUTIVE_DROPS: u32 = 32;

/// A registered broadcast sink for one session.
#[derive(Debug, Clone)]
pub struct Subscriber {
    session_id: SessionId,
    node_id: String,
    tx: mpsc::Sender<StateUpdate>,
    consecutive_drops: Arc<AtomicU32>,
}

impl Subscriber {
    /// Create a handle around a session's bounded broadcast sender.
    #[must_use]
    pub fn new(session_id: SessionId, node_id: &str, tx: mpsc::Sender<StateUpdate>) -> Self {
        Self {
            session_id,
            node_id: node_id.to_string(),
            tx,
            consecutive_drops: Arc::new(AtomicU32::new(0)),
        }
    }

    /// The owning session.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The peer's node id (for log context).
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Attempt a non-blocking delivery.
    pub fn deliver(&self, update: StateUpdate) -> Delivery {
        match self.tx.try_send(update) {
            Ok(()) => {
                self.consecutive_drops.store(0, Ordering::Relaxed);
                Delivery::Sent
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let drops = self.consecutive_drops.fetch_add(1, Ordering::Relaxed) + 1;
                if drops >= MAX_CONSECUTIVE_DROPS {
                    Delivery::Dead
                } else {
                    Delivery::Dropped
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Dead,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(origin: SessionId) -> StateUpdate {
        StateUpdate {
            key: "k".into(),
            state: json!({"kind": "g_counter"}),
            origin,
        }
    }

    #[tokio::test]
    async fn test_deliver_sends_in_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let id = Uuid::new_v4();
        let sub = Subscriber::new(id, "peer", tx);

        for _ in 0..3 {
            assert_eq!(sub.deliver(update(id)), Delivery::Sent);
        }
        drop(sub);
        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 3);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let sub = Subscriber::new(Uuid::new_v4(), "slow", tx);

        assert_eq!(sub.deliver(update(Uuid::new_v4())), Delivery::Sent);
        assert_eq!(sub.deliver(update(Uuid::new_v4())), Delivery::Dropped);
    }

    #[tokio::test]
    async fn test_closed_receiver_is_dead() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sub = Subscriber::new(Uuid::new_v4(), "gone", tx);
        assert_eq!(sub.deliver(update(Uuid::new_v4())), Delivery::Dead);
    }

    #[tokio::test]
    async fn test_persistent_backpressure_becomes_dead() {
        let (tx, _rx) = mpsc::channel(1);
        let sub = Subscriber::new(Uuid::new_v4(), "stalled", tx);
        assert_eq!(sub.deliver(update(Uuid::new_v4())), Delivery::Sent);

        let mut last = Delivery::Sent;
        for _ in 0..MAX_CONSECUTIVE_DROPS {
            last = sub.deliver(update(Uuid::new_v4()));
        }
        assert_eq!(last, Delivery::Dead);
    }
}
