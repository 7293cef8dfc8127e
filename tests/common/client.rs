//! Test websocket peer.
//!
//! A thin client that speaks the protocol envelope and can assert on
//! replies, broadcasts, close frames, and silence.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected test peer.
pub struct TestPeer {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pub node_id: String,
}

impl TestPeer {
    /// Open a socket without sending connect parameters.
    pub async fn connect_raw(url: &str) -> anyhow::Result<Self> {
        let (ws, _) = connect_async(url).await?;
        Ok(Self {
            ws,
            node_id: String::new(),
        })
    }

    /// Connect and authenticate as `node_id` with no capability report.
    pub async fn connect(url: &str, node_id: &str) -> anyhow::Result<Self> {
        let (peer, _reply) = Self::connect_with_caps(url, node_id, Value::Null).await?;
        Ok(peer)
    }

    /// Connect and authenticate with a capability report; returns the peer
    /// and the connect reply.
    pub async fn connect_with_caps(
        url: &str,
        node_id: &str,
        capabilities: Value,
    ) -> anyhow::Result<(Self, Value)> {
        let mut peer = Self::connect_raw(url).await?;
        peer.node_id = node_id.to_string();

        let mut payload = json!({ "node_id": node_id });
        if !capabilities.is_null() {
            payload["capabilities"] = capabilities;
        }
        peer.send(json!({ "event": "connect", "payload": payload })).await?;

        let reply = peer.recv_reply().await?;
        anyhow::ensure!(
            reply["status"] == "ok",
            "connect rejected: {reply}"
        );
        Ok((peer, reply))
    }

    /// Send one JSON frame.
    pub async fn send(&mut self, frame: Value) -> anyhow::Result<()> {
        self.ws.send(Message::Text(frame.to_string())).await?;
        Ok(())
    }

    /// Send an event with payload and return the matching reply.
    pub async fn request(&mut self, event: &str, payload: Value) -> anyhow::Result<Value> {
        self.send(json!({ "event": event, "payload": payload })).await?;
        self.recv_reply().await
    }

    /// Send an event with payload and a request id; return the reply.
    pub async fn request_with_id(
        &mut self,
        event: &str,
        payload: Value,
        request_id: &str,
    ) -> anyhow::Result<Value> {
        self.send(json!({
            "event": event,
            "payload": payload,
            "request_id": request_id,
        }))
        .await?;
        self.recv_reply().await
    }

    /// Join a topic; returns the reply data (state, profile, config).
    pub async fn join(&mut self, topic: &str) -> anyhow::Result<Value> {
        let reply = self.request("join", json!({ "topic": topic })).await?;
        anyhow::ensure!(reply["status"] == "ok", "join rejected: {reply}");
        Ok(reply["data"].clone())
    }

    /// Next JSON frame of any shape (skips ping/pong).
    pub async fn recv_json(&mut self) -> anyhow::Result<Value> {
        loop {
            let message = timeout(RECV_TIMEOUT, self.ws.next())
                .await?
                .ok_or_else(|| anyhow::anyhow!("connection ended"))??;
            match message {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(frame) => {
                    anyhow::bail!(
                        "closed: {}",
                        frame.map(|f| f.reason.to_string()).unwrap_or_default()
                    )
                }
                other => anyhow::bail!("unexpected frame: {other:?}"),
            }
        }
    }

    /// Next reply frame, skipping interleaved broadcasts.
    pub async fn recv_reply(&mut self) -> anyhow::Result<Value> {
        loop {
            let frame = self.recv_json().await?;
            if frame.get("status").is_some() {
                return Ok(frame);
            }
        }
    }

    /// Next `state_updated` broadcast, skipping anything else.
    pub async fn recv_broadcast(&mut self) -> anyhow::Result<Value> {
        loop {
            let frame = self.recv_json().await?;
            if frame["event"] == "state_updated" {
                return Ok(frame["payload"]["state"].clone());
            }
        }
    }

    /// Assert no frame (other than keepalive) arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) -> anyhow::Result<()> {
        match timeout(window, self.recv_json()).await {
            Err(_) => Ok(()),
            Ok(Ok(frame)) => anyhow::bail!("expected silence, got {frame}"),
            // A close or transport end also breaks the silence contract.
            Ok(Err(e)) => anyhow::bail!("expected silence, got termination: {e}"),
        }
    }

    /// Read until the server's close frame; returns its reason code.
    pub async fn expect_close(&mut self) -> anyhow::Result<String> {
        loop {
            let message = timeout(RECV_TIMEOUT, self.ws.next())
                .await?
                .ok_or_else(|| anyhow::anyhow!("connection ended without close frame"))??;
            match message {
                Message::Close(frame) => {
                    return Ok(frame.map(|f| f.reason.to_string()).unwrap_or_default())
                }
                _ => continue,
            }
        }
    }
}
