//! Phase 2: the unified session event loop.
//!
//! One `tokio::select!` over four sources: inbound transport frames,
//! registry broadcasts for the joined key, the keepalive timer, and the
//! server shutdown signal. Replies go out before the loop polls again, so
//! a command's reply always precedes any broadcast queued after its
//! commit - per-session FIFO.

use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{JoinedTopic, PeerState, Session};
use crate::commands::CommandEnvelope;
use crate::error::{CommandError, SessionError};
use crate::metrics;
use crate::network::transport::{CloseClass, Inbound, SendStatus, Transport, TransportError};
use crate::protocol::{parse_topic, state_updated_frame, ClientFrame, ConnectParams, Reply};
use crate::state::subscriber::{StateUpdate, Subscriber};
use lattice_crdt::{decode, encode, Replica};

/// Outcome of one select round.
enum SelectOutcome {
    Inbound(Inbound),
    TransportFailed(TransportError),
    Broadcast(Option<StateUpdate>),
    KeepaliveTick,
    ShutdownSignal,
}

/// What a handled frame asks the loop to do next.
enum Flow {
    Continue,
    /// Peer is gone; no close frame can reach it.
    PeerGone,
    /// Fatal condition; close with this error's reason code.
    Fatal(SessionError),
}

async fn recv_broadcast(joined: &mut Option<JoinedTopic>) -> Option<StateUpdate> {
    match joined {
        Some(topic) => topic.rx.recv().await,
        None => std::future::pending().await,
    }
}

impl<T: Transport> Session<T> {
    /// Run the event loop until the peer leaves, a fatal condition closes
    /// the session, or the server shuts down. Returns the fatal error, if
    /// any, for logging.
    pub(super) async fn event_loop(&mut self, state: &mut PeerState) -> Option<SessionError> {
        let keepalive = Duration::from_secs(self.core.config.channel.keepalive_secs);
        let mut keepalive_timer =
            tokio::time::interval((keepalive / 4).max(Duration::from_millis(250)));
        // First tick fires immediately, we don't want that.
        keepalive_timer.tick().await;

        loop {
            let outcome = {
                let transport = &mut self.transport;
                let shutdown = &mut self.shutdown;
                tokio::select! {
                    result = transport.receive() => match result {
                        Ok(event) => SelectOutcome::Inbound(event),
                        Err(e) => SelectOutcome::TransportFailed(e),
                    },
                    update = recv_broadcast(&mut state.joined) => SelectOutcome::Broadcast(update),
                    _ = keepalive_timer.tick() => SelectOutcome::KeepaliveTick,
                    _ = shutdown.changed() => SelectOutcome::ShutdownSignal,
                }
            };

            let flow = match outcome {
                SelectOutcome::Inbound(Inbound::Message(text)) => {
                    state.last_activity = Instant::now();
                    state.ping_pending = false;
                    self.handle_frame(state, &text).await
                }
                SelectOutcome::Inbound(Inbound::Keepalive) => {
                    state.last_activity = Instant::now();
                    state.ping_pending = false;
                    Flow::Continue
                }
                SelectOutcome::Inbound(Inbound::Closed) => Flow::PeerGone,
                SelectOutcome::TransportFailed(e) => {
                    Flow::Fatal(SessionError::Transport(e.to_string()))
                }
                SelectOutcome::Broadcast(update) => self.handle_broadcast(update).await,
                SelectOutcome::KeepaliveTick => self.check_keepalive(state, keepalive).await,
                SelectOutcome::ShutdownSignal => Flow::Fatal(SessionError::Shutdown),
            };

            match flow {
                Flow::Continue => continue,
                Flow::PeerGone => return None,
                Flow::Fatal(err) => {
                    self.transport
                        .send_close(close_class(&err), err.reason_code())
                        .await;
                    return Some(err);
                }
            }
        }
    }

    /// Forward a registry broadcast, suppressing the echo of this session's
    /// own mutation (its command reply already carried the state).
    async fn handle_broadcast(&mut self, update: Option<StateUpdate>) -> Flow {
        let Some(update) = update else {
            // The registry dropped our subscriber: this session was not
            // draining its queue.
            return Flow::Fatal(SessionError::Backpressure);
        };
        if update.origin == self.id {
            return Flow::Continue;
        }
        debug!(key = %update.key, "Forwarding state update");
        match self
            .transport
            .send_text(&state_updated_frame(&update.state))
            .await
        {
            SendStatus::Sent => Flow::Continue,
            SendStatus::Backpressure => Flow::Fatal(SessionError::Backpressure),
            SendStatus::Closed => Flow::PeerGone,
        }
    }

    /// Keepalive policy: at least one frame must move inside the window.
    async fn check_keepalive(&mut self, state: &mut PeerState, window: Duration) -> Flow {
        let idle = state.last_activity.elapsed();
        if idle >= window {
            return Flow::Fatal(SessionError::IdleTimeout);
        }
        if idle >= window / 2 && !state.ping_pending {
            match self.transport.send_ping().await {
                SendStatus::Sent => state.ping_pending = true,
                SendStatus::Backpressure => return Flow::Fatal(SessionError::Backpressure),
                SendStatus::Closed => return Flow::PeerGone,
            }
        }
        Flow::Continue
    }

    /// Decode and dispatch one inbound frame.
    async fn handle_frame(&mut self, state: &mut PeerState, text: &str) -> Flow {
        let frame = match ClientFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => return Flow::Fatal(SessionError::Decode(e.to_string())),
        };

        match frame.event.as_str() {
            "connect" => self.handle_capability_update(state, &frame).await,
            "join" => self.handle_join(state, &frame).await,
            "leave" => self.handle_leave(state, &frame).await,
            "sync" => self.handle_sync(state, &frame).await,
            "increment" | "increment_by" | "decrement" | "set" | "add" | "remove" | "merge" => {
                self.handle_command(state, &frame).await
            }
            other => {
                self.send_error(
                    frame.request_id.clone(),
                    &CommandError::UnknownCommand(other.to_string()),
                )
                .await
            }
        }
    }

    /// A repeated connect frame re-reports capabilities; the profile may
    /// change for future joins, nothing else is signalled.
    async fn handle_capability_update(&mut self, state: &mut PeerState, frame: &ClientFrame) -> Flow {
        let params = match ConnectParams::from_payload(&frame.payload) {
            Ok(params) => params,
            Err(e) => {
                return self
                    .send_error(
                        frame.request_id.clone(),
                        &CommandError::InvalidCommand(format!("malformed connect parameters: {e}")),
                    )
                    .await;
            }
        };
        let report = params.capabilities.unwrap_or_default();
        state.profile = self.core.policy.update(&state.node_id, report);
        let config = self.core.policy.config_for(state.profile);
        self.send_reply(Reply::ok(
            frame.request_id.clone(),
            json!({
                "node_id": state.node_id,
                "profile": state.profile.as_str(),
                "config": config,
            }),
        ))
        .await
    }

    /// Join a replica topic: subscribe and return the current state with
    /// the peer's delivery profile.
    async fn handle_join(&mut self, state: &mut PeerState, frame: &ClientFrame) -> Flow {
        let payload = frame.payload_object().cloned().unwrap_or_default();

        let Some(topic) = payload.get("topic").and_then(Value::as_str) else {
            return self
                .send_error(
                    frame.request_id.clone(),
                    &CommandError::MissingField("topic".to_string()),
                )
                .await;
        };

        let key = match parse_topic(topic) {
            Ok(key) => key.to_string(),
            Err(err) => {
                // Topic rejection is terminal for the session.
                let reply = Reply::error(frame.request_id.clone(), &err);
                let _ = self.transport.send_text(&reply.to_frame()).await;
                return Flow::Fatal(SessionError::Unauthorized(err.to_string()));
            }
        };

        if let Some(old) = state.joined.take() {
            self.core.registry.unsubscribe(&old.key, self.id);
        }

        let (tx, rx) = tokio::sync::mpsc::channel(self.core.config.channel.subscriber_buffer);
        self.core
            .registry
            .subscribe(&key, Subscriber::new(self.id, &state.node_id, tx));

        // A fresh key is not installed at join time. The peer sees the
        // default kind's empty state, and the first mutating command binds
        // the key to the kind that command implies.
        let replica = self
            .core
            .registry
            .get(&key)
            .unwrap_or_else(|| Replica::empty(self.core.default_kind));

        info!(node_id = %state.node_id, key = %key, "Peer joined topic");
        state.joined = Some(JoinedTopic { key, rx });

        let config = self.core.policy.config_for(state.profile);
        self.send_reply(Reply::ok(
            frame.request_id.clone(),
            json!({
                "state": encode(&replica),
                "profile": state.profile.as_str(),
                "config": config,
            }),
        ))
        .await
    }

    async fn handle_leave(&mut self, state: &mut PeerState, frame: &ClientFrame) -> Flow {
        if let Some(topic) = state.joined.take() {
            self.core.registry.unsubscribe(&topic.key, self.id);
            info!(node_id = %state.node_id, key = %topic.key, "Peer left topic");
        }
        self.send_reply(Reply::ok(frame.request_id.clone(), json!({}))).await
    }

    /// Delta sync: the peer sends its last-known state, we answer with the
    /// delta that brings it up to the current replica.
    async fn handle_sync(&mut self, state: &mut PeerState, frame: &ClientFrame) -> Flow {
        let Some(joined) = &state.joined else {
            return self
                .send_error(
                    frame.request_id.clone(),
                    &CommandError::InvalidCommand("no topic joined".to_string()),
                )
                .await;
        };

        let payload = frame.payload_object().cloned().unwrap_or_default();
        let Some(client_state) = payload.get("state") else {
            return self
                .send_error(
                    frame.request_id.clone(),
                    &CommandError::MissingField("state".to_string()),
                )
                .await;
        };

        let result = decode(client_state)
            .map_err(CommandError::from)
            .and_then(|client| {
                self.core
                    .registry
                    .delta(&joined.key, &client)
                    .map_err(CommandError::from)
            });

        match result {
            Ok(delta) => {
                self.send_reply(Reply::ok(
                    frame.request_id.clone(),
                    json!({ "delta": encode(&delta) }),
                ))
                .await
            }
            Err(err) => self.send_error(frame.request_id.clone(), &err).await,
        }
    }

    /// Dispatch a mutation to the command processor under the joined key
    /// and this session's node identity.
    async fn handle_command(&mut self, state: &mut PeerState, frame: &ClientFrame) -> Flow {
        let Some(joined) = &state.joined else {
            return self
                .send_error(
                    frame.request_id.clone(),
                    &CommandError::InvalidCommand("no topic joined".to_string()),
                )
                .await;
        };

        let mut payload: Map<String, Value> = match &frame.payload {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            _ => {
                return self
                    .send_error(
                        frame.request_id.clone(),
                        &CommandError::InvalidCommand("payload must be an object".to_string()),
                    )
                    .await;
            }
        };

        // The session owns the routing context: peers cannot address other
        // keys or author under other node ids.
        payload.insert("key".to_string(), Value::String(joined.key.clone()));
        payload.insert("node_id".to_string(), Value::String(state.node_id.clone()));

        let envelope = CommandEnvelope::for_event(&frame.event, payload, frame.request_id.clone());
        match self
            .core
            .processor
            .execute(self.id, &mut state.cache, &envelope)
        {
            Ok(data) => self.send_reply(Reply::ok(frame.request_id.clone(), data)).await,
            Err(err) => self.send_error(frame.request_id.clone(), &err).await,
        }
    }

    /// Send an error reply for a recoverable failure; the session stays
    /// open.
    async fn send_error(&mut self, request_id: Option<String>, err: &CommandError) -> Flow {
        metrics::inc_commands_rejected();
        debug!(kind = err.error_code(), "Command rejected");
        self.send_reply(Reply::error(request_id, err)).await
    }

    async fn send_reply(&mut self, reply: Reply) -> Flow {
        match self.transport.send_text(&reply.to_frame()).await {
            SendStatus::Sent => Flow::Continue,
            SendStatus::Backpressure => Flow::Fatal(SessionError::Backpressure),
            SendStatus::Closed => Flow::PeerGone,
        }
    }
}

fn close_class(err: &SessionError) -> CloseClass {
    match err {
        SessionError::Transport(_) => CloseClass::Internal,
        SessionError::Decode(_) => CloseClass::Invalid,
        SessionError::Backpressure
        | SessionError::IdleTimeout
        | SessionError::Unauthorized(_) => CloseClass::Policy,
        SessionError::Shutdown => CloseClass::Normal,
    }
}
