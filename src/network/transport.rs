//! Message-oriented transport abstraction.
//!
//! Sessions speak to peers through the [`Transport`] trait: opaque text
//! frames in, text frames out, plus keepalive and close signalling. The
//! production implementation wraps a websocket; tests substitute in-memory
//! duplexes behind the same trait.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Outcome of one send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    /// The frame did not flush inside the send deadline.
    Backpressure,
    /// The peer is gone.
    Closed,
}

/// One received transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text frame carrying a protocol envelope.
    Message(String),
    /// Ping/pong traffic; counts as liveness, carries no payload.
    Keepalive,
    /// The peer closed the connection.
    Closed,
}

/// A transport-level read failure (fatal for the session).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Close classes, mapped to websocket close codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    /// Orderly close (leave, shutdown).
    Normal,
    /// The peer violated protocol or policy (unauthorized, backpressure,
    /// idle timeout).
    Policy,
    /// The peer sent something undecodable.
    Invalid,
    /// Server-side failure.
    Internal,
}

impl CloseClass {
    fn code(self) -> CloseCode {
        match self {
            Self::Normal => CloseCode::Normal,
            Self::Policy => CloseCode::Policy,
            Self::Invalid => CloseCode::Invalid,
            Self::Internal => CloseCode::Error,
        }
    }
}

/// Duplex, message-oriented transport used by a session.
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame.
    async fn send_text(&mut self, frame: &str) -> SendStatus;

    /// Send a keepalive probe.
    async fn send_ping(&mut self) -> SendStatus;

    /// Send a close frame with a reason code the peer can distinguish from
    /// network loss, then close. Idempotent.
    async fn send_close(&mut self, class: CloseClass, reason: &str);

    /// Receive the next event. Blocks until a frame arrives, the peer
    /// closes, or the transport fails.
    async fn receive(&mut self) -> Result<Inbound, TransportError>;
}

/// Websocket-backed transport.
pub struct WsTransport {
    ws: WebSocketStream<TcpStream>,
    send_timeout: Duration,
    closed: bool,
}

impl WsTransport {
    /// Wrap an accepted websocket stream.
    #[must_use]
    pub fn new(ws: WebSocketStream<TcpStream>, send_timeout: Duration) -> Self {
        Self {
            ws,
            send_timeout,
            closed: false,
        }
    }

    async fn send_message(&mut self, message: Message) -> SendStatus {
        if self.closed {
            return SendStatus::Closed;
        }
        match tokio::time::timeout(self.send_timeout, self.ws.send(message)).await {
            Ok(Ok(())) => SendStatus::Sent,
            Ok(Err(_)) => {
                self.closed = true;
                SendStatus::Closed
            }
            Err(_) => SendStatus::Backpressure,
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, frame: &str) -> SendStatus {
        self.send_message(Message::Text(frame.to_string())).await
    }

    async fn send_ping(&mut self) -> SendStatus {
        self.send_message(Message::Ping(Vec::new())).await
    }

    async fn send_close(&mut self, class: CloseClass, reason: &str) {
        if self.closed {
            return;
        }
        let frame = CloseFrame {
            code: class.code(),
            reason: reason.to_string().into(),
        };
        let _ = tokio::time::timeout(self.send_timeout, self.ws.close(Some(frame))).await;
        self.closed = true;
    }

    async fn receive(&mut self) -> Result<Inbound, TransportError> {
        loop {
            match self.ws.next().await {
                None => return Ok(Inbound::Closed),
                Some(Ok(Message::Text(text))) => return Ok(Inbound::Message(text)),
                Some(Ok(Message::Binary(bytes))) => {
                    // The envelope is UTF-8 JSON whichever frame type
                    // carried it.
                    return String::from_utf8(bytes)
                        .map(Inbound::Message)
                        .map_err(|_| TransportError("invalid UTF-8 in binary frame".into()));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => return Ok(Inbound::Keepalive),
                Some(Ok(Message::Close(_))) => return Ok(Inbound::Closed),
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(e)) => return Err(TransportError(e.to_string())),
            }
        }
    }
}
