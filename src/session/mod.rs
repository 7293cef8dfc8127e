//! Session - the per-peer coordinator.
//!
//! Each session runs in its own tokio task with two phases:
//!
//! ```text
//! Phase 1: Handshake (first frame must be `connect` with a node id)
//!    ↓
//! Phase 2: Unified event loop (tokio::select!)
//!    ┌──────────────────────────────────────────────────┐
//!    │                 Session Task                     │
//!    │                                                  │
//!    │   inbound frames ──► command processor ──► reply │
//!    │   broadcast rx ────► state_updated (echo cut)    │
//!    │   keepalive tick ──► ping / idle close           │
//!    │   shutdown watch ──► orderly close               │
//!    └──────────────────────────────────────────────────┘
//! ```
//!
//! The session holds no CRDT state of its own; it is a routing and framing
//! layer between the transport and the registry/processor. Recoverable
//! command failures become error replies; fatal conditions close the
//! session with a reason code and release every registration.

mod event_loop;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::commands::idempotency::IdempotencyCache;
use crate::error::SessionError;
use crate::metrics;
use crate::network::transport::{CloseClass, Inbound, SendStatus, Transport};
use crate::policy::Profile;
use crate::protocol::{ClientFrame, ConnectParams, Reply};
use crate::state::subscriber::{SessionId, StateUpdate};
use crate::state::Core;

/// Per-session state after authentication.
struct PeerState {
    node_id: String,
    profile: Profile,
    joined: Option<JoinedTopic>,
    cache: IdempotencyCache,
    last_activity: Instant,
    ping_pending: bool,
}

/// The session's current logical join.
struct JoinedTopic {
    key: String,
    rx: mpsc::Receiver<StateUpdate>,
}

/// A peer session over one transport.
pub struct Session<T: Transport> {
    id: SessionId,
    addr: SocketAddr,
    core: Arc<Core>,
    transport: T,
    shutdown: watch::Receiver<bool>,
}

impl<T: Transport> Session<T> {
    /// Create a session around an accepted transport.
    pub fn new(
        id: SessionId,
        addr: SocketAddr,
        core: Arc<Core>,
        transport: T,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            addr,
            core,
            transport,
            shutdown,
        }
    }

    /// Run the session lifecycle to completion.
    #[instrument(skip(self), fields(session = %self.id, addr = %self.addr), name = "session")]
    pub async fn run(mut self) {
        metrics::inc_active_sessions();
        info!("Peer connected");

        if let Some(mut state) = self.handshake().await {
            let exit = self.event_loop(&mut state).await;
            match &exit {
                None => info!(node_id = %state.node_id, "Peer disconnected"),
                Some(err) => {
                    warn!(node_id = %state.node_id, reason = err.reason_code(), "Session closed");
                }
            }
            self.cleanup(&mut state);
        }

        metrics::dec_active_sessions();
    }

    /// Phase 1: wait for the connect frame and register the peer.
    ///
    /// Returns `None` when the connection was rejected or lost; any reply
    /// and close frame has already been sent.
    async fn handshake(&mut self) -> Option<PeerState> {
        let window = Duration::from_secs(self.core.config.channel.keepalive_secs);

        loop {
            let event = match timeout(window, self.transport.receive()).await {
                Err(_) => {
                    debug!("No connect frame inside the keepalive window");
                    self.transport
                        .send_close(CloseClass::Policy, SessionError::IdleTimeout.reason_code())
                        .await;
                    return None;
                }
                Ok(Err(e)) => {
                    debug!(error = %e, "Transport error during handshake");
                    return None;
                }
                Ok(Ok(event)) => event,
            };

            let text = match event {
                Inbound::Message(text) => text,
                Inbound::Keepalive => continue,
                Inbound::Closed => {
                    debug!("Peer closed during handshake");
                    return None;
                }
            };

            let frame = match ClientFrame::parse(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(error = %e, "Undecodable handshake frame");
                    self.transport
                        .send_close(CloseClass::Invalid, "decode_error")
                        .await;
                    return None;
                }
            };

            if frame.event != "connect" {
                return self
                    .reject(frame.request_id, format!("expected connect, got {}", frame.event))
                    .await;
            }

            let params = match ConnectParams::from_payload(&frame.payload) {
                Ok(params) => params,
                Err(e) => {
                    return self
                        .reject(frame.request_id, format!("malformed connect parameters: {e}"))
                        .await;
                }
            };

            let node_id = match params.node_id {
                Some(node_id) if !node_id.is_empty() => node_id,
                _ => {
                    return self.reject(frame.request_id, "missing node_id".to_string()).await;
                }
            };

            let report = params.capabilities.unwrap_or_default();
            let profile = self.core.policy.register(&node_id, report);
            let config = self.core.policy.config_for(profile);

            let reply = Reply::ok(
                frame.request_id,
                json!({
                    "node_id": node_id,
                    "profile": profile.as_str(),
                    "config": config,
                }),
            );
            if self.transport.send_text(&reply.to_frame()).await != SendStatus::Sent {
                self.core.policy.unregister(&node_id);
                return None;
            }

            info!(node_id = %node_id, profile = %profile.as_str(), "Peer authenticated");
            let channel = &self.core.config.channel;
            return Some(PeerState {
                node_id,
                profile,
                joined: None,
                cache: IdempotencyCache::new(
                    Duration::from_secs(channel.idempotency_ttl_secs),
                    channel.idempotency_max_entries,
                ),
                last_activity: Instant::now(),
                ping_pending: false,
            });
        }
    }

    /// Send an unauthorized error reply and reject the connection.
    async fn reject(&mut self, request_id: Option<String>, detail: String) -> Option<PeerState> {
        let err = crate::error::CommandError::Unauthorized(detail);
        let reply = Reply::error(request_id, &err);
        let _ = self.transport.send_text(&reply.to_frame()).await;
        self.transport
            .send_close(CloseClass::Policy, "unauthorized")
            .await;
        None
    }

    /// Canonical cleanup: every registration this session holds is
    /// released, whatever path ended it.
    fn cleanup(&mut self, state: &mut PeerState) {
        if let Some(topic) = state.joined.take() {
            self.core.registry.unsubscribe(&topic.key, self.id);
        }
        self.core.policy.unregister(&state.node_id);
    }
}
