//! Wire envelope for the synchronization channel.
//!
//! Frames are JSON text. Peers send `{event, payload, request_id?}`, the
//! server answers with `{status, data?, error?}` and pushes unsolicited
//! `{event: "state_updated", payload: {state}}` broadcasts. Connect
//! parameters arrive as the first frame after the socket opens.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::CommandError;
use crate::policy::CapabilityReport;

/// Topic prefix for replica channels; everything else is rejected.
pub const TOPIC_PREFIX: &str = "crdt:";

/// An inbound frame from a peer.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl ClientFrame {
    /// Parse a text frame. Failure here is fatal for the session.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The payload as an object map; commands with scalar payloads are
    /// shape errors, reported as such by the processor.
    #[must_use]
    pub fn payload_object(&self) -> Option<&Map<String, Value>> {
        self.payload.as_object()
    }
}

/// Connect parameters, carried in the first frame's payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub capabilities: Option<CapabilityReport>,
}

impl ConnectParams {
    /// Parse connect parameters from a frame payload. A null payload is an
    /// empty report, which the session rejects for its missing node id.
    pub fn from_payload(payload: &Value) -> Result<Self, serde_json::Error> {
        if payload.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(payload.clone())
    }
}

/// An outbound reply to a specific inbound frame.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

/// The error half of an error reply.
#[derive(Debug, Clone, Serialize)]
pub struct ReplyError {
    pub kind: &'static str,
    pub message: String,
}

impl Reply {
    /// A successful reply carrying `data`.
    #[must_use]
    pub fn ok(request_id: Option<String>, data: Value) -> Self {
        Self {
            status: "ok",
            request_id,
            data: Some(data),
            error: None,
        }
    }

    /// An error reply for a recoverable command failure.
    #[must_use]
    pub fn error(request_id: Option<String>, err: &CommandError) -> Self {
        Self {
            status: "error",
            request_id,
            data: None,
            error: Some(ReplyError {
                kind: err.error_code(),
                message: err.to_string(),
            }),
        }
    }

    /// Serialize to a text frame.
    #[must_use]
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"status":"error","error":{"kind":"internal","message":"encode failure"}}"#.into()
        })
    }
}

/// Build a `state_updated` broadcast frame around an encoded replica.
#[must_use]
pub fn state_updated_frame(state: &Value) -> String {
    json!({
        "event": "state_updated",
        "payload": { "state": state },
    })
    .to_string()
}

/// Split a topic string into its key.
///
/// Topics are `crdt:` plus an opaque non-empty key with no embedded nulls;
/// anything else is rejected as unauthorized.
pub fn parse_topic(topic: &str) -> Result<&str, CommandError> {
    let key = topic
        .strip_prefix(TOPIC_PREFIX)
        .ok_or_else(|| CommandError::Unauthorized(format!("unknown topic prefix: {topic}")))?;
    if key.is_empty() {
        return Err(CommandError::Unauthorized("empty topic key".into()));
    }
    if key.contains('\0') {
        return Err(CommandError::Unauthorized("topic key contains null".into()));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client_frame() {
        let frame = ClientFrame::parse(
            r#"{"event":"increment","payload":{"amount":2},"request_id":"r1"}"#,
        )
        .unwrap();
        assert_eq!(frame.event, "increment");
        assert_eq!(frame.request_id.as_deref(), Some("r1"));
        assert_eq!(frame.payload_object().unwrap()["amount"], json!(2));
    }

    #[test]
    fn test_frame_without_payload_defaults_to_null() {
        let frame = ClientFrame::parse(r#"{"event":"leave"}"#).unwrap();
        assert!(frame.payload.is_null());
        assert!(frame.request_id.is_none());
    }

    #[test]
    fn test_ok_reply_shape() {
        let reply = Reply::ok(Some("r1".into()), json!({"value": 3}));
        let encoded: Value = serde_json::from_str(&reply.to_frame()).unwrap();
        assert_eq!(encoded["status"], "ok");
        assert_eq!(encoded["request_id"], "r1");
        assert_eq!(encoded["data"]["value"], 3);
        assert!(encoded.get("error").is_none());
    }

    #[test]
    fn test_error_reply_shape() {
        let reply = Reply::error(None, &CommandError::NotFound("c1".into()));
        let encoded: Value = serde_json::from_str(&reply.to_frame()).unwrap();
        assert_eq!(encoded["status"], "error");
        assert_eq!(encoded["error"]["kind"], "not_found");
        assert!(encoded.get("request_id").is_none());
    }

    #[test]
    fn test_topic_parsing() {
        assert_eq!(parse_topic("crdt:counter1").unwrap(), "counter1");

        for bad in ["room:counter1", "crdt:", "counter1", "crdt:a\0b"] {
            let err = parse_topic(bad).unwrap_err();
            assert_eq!(err.error_code(), "unauthorized");
        }
    }

    #[test]
    fn test_state_updated_frame_shape() {
        let frame = state_updated_frame(&json!({"kind": "g_counter"}));
        let encoded: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(encoded["event"], "state_updated");
        assert_eq!(encoded["payload"]["state"]["kind"], "g_counter");
    }
}
