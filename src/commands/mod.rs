//! Command processing: validation, dispatch, and the idempotency gate.
//!
//! A command envelope is `{type, payload, request_id?}` where the type picks
//! both the mutation and the CRDT kind it implies. Validation is a pure
//! check over the envelope shape; execution ensures the replica exists with
//! the implied kind and applies the mutation atomically through the
//! registry. A kind disagreement surfaces as `kind_mismatch` - there is no
//! silent upgrade.

pub mod idempotency;

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{CommandError, CommandResult};
use crate::metrics;
use crate::state::registry::Registry;
use crate::state::subscriber::SessionId;
use idempotency::IdempotencyCache;
use lattice_crdt::{decode, encode, Replica, ReplicaKind};

/// A command envelope as dispatched by a session.
///
/// The session injects `key` and `node_id` into the payload from its own
/// join and connect state, so a peer can never author on another node's
/// behalf.
#[derive(Debug, Clone)]
pub struct CommandEnvelope {
    pub command_type: String,
    pub payload: Map<String, Value>,
    pub request_id: Option<String>,
}

impl CommandEnvelope {
    /// Build the envelope for a channel event verb.
    #[must_use]
    pub fn for_event(event: &str, payload: Map<String, Value>, request_id: Option<String>) -> Self {
        Self {
            command_type: format!("crdt.{event}"),
            payload,
            request_id,
        }
    }
}

/// A validated command, ready to execute.
#[derive(Debug, Clone, PartialEq)]
enum ParsedCommand {
    Increment { key: String, node_id: String },
    IncrementBy { key: String, node_id: String, amount: u64 },
    Decrement { key: String, node_id: String },
    Set { key: String, node_id: String, value: Value },
    Add { key: String, node_id: String, element: String },
    Remove { key: String, element: String },
    Merge { key: String, state: Replica },
}

impl ParsedCommand {
    fn key(&self) -> &str {
        match self {
            Self::Increment { key, .. }
            | Self::IncrementBy { key, .. }
            | Self::Decrement { key, .. }
            | Self::Set { key, .. }
            | Self::Add { key, .. }
            | Self::Remove { key, .. }
            | Self::Merge { key, .. } => key,
        }
    }

    /// The CRDT kind this command implies.
    fn kind(&self) -> ReplicaKind {
        match self {
            Self::Increment { .. } | Self::IncrementBy { .. } => ReplicaKind::GCounter,
            Self::Decrement { .. } => ReplicaKind::PnCounter,
            Self::Set { .. } => ReplicaKind::LwwRegister,
            Self::Add { .. } | Self::Remove { .. } => ReplicaKind::OrSet,
            Self::Merge { state, .. } => state.kind(),
        }
    }
}

fn required_str(payload: &Map<String, Value>, field: &str) -> CommandResult<String> {
    match payload.get(field) {
        None => Err(CommandError::MissingField(field.to_string())),
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => {
            Err(CommandError::InvalidCommand(format!("{field} must be non-empty")))
        }
        Some(_) => Err(CommandError::InvalidCommand(format!("{field} must be a string"))),
    }
}

fn required_amount(payload: &Map<String, Value>) -> CommandResult<u64> {
    match payload.get("amount") {
        None => Err(CommandError::MissingField("amount".to_string())),
        Some(value) => value.as_u64().ok_or_else(|| {
            CommandError::InvalidCommand("amount must be a non-negative integer".to_string())
        }),
    }
}

/// Validate an envelope into a command. Pure; no side effects on failure.
fn parse(envelope: &CommandEnvelope) -> CommandResult<ParsedCommand> {
    let payload = &envelope.payload;
    let key = required_str(payload, "key")?;

    match envelope.command_type.as_str() {
        "crdt.increment" => Ok(ParsedCommand::Increment {
            key,
            node_id: required_str(payload, "node_id")?,
        }),
        "crdt.increment_by" => Ok(ParsedCommand::IncrementBy {
            key,
            node_id: required_str(payload, "node_id")?,
            amount: required_amount(payload)?,
        }),
        "crdt.decrement" => Ok(ParsedCommand::Decrement {
            key,
            node_id: required_str(payload, "node_id")?,
        }),
        "crdt.set" => Ok(ParsedCommand::Set {
            key,
            node_id: required_str(payload, "node_id")?,
            value: payload
                .get("value")
                .cloned()
                .ok_or_else(|| CommandError::MissingField("value".to_string()))?,
        }),
        "crdt.add" => Ok(ParsedCommand::Add {
            key,
            node_id: required_str(payload, "node_id")?,
            element: required_str(payload, "element")?,
        }),
        "crdt.remove" => Ok(ParsedCommand::Remove {
            key,
            element: required_str(payload, "element")?,
        }),
        "crdt.merge" => {
            let state = payload
                .get("state")
                .ok_or_else(|| CommandError::MissingField("state".to_string()))?;
            Ok(ParsedCommand::Merge {
                key,
                state: decode(state)?,
            })
        }
        other => Err(CommandError::UnknownCommand(other.to_string())),
    }
}

/// Validates and executes command envelopes against the registry.
pub struct CommandProcessor {
    registry: Arc<Registry>,
}

impl CommandProcessor {
    /// Create a processor bound to a registry handle.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Validate, idempotency-gate, and execute one envelope.
    ///
    /// On success the reply data carries the committed wire state. The
    /// request id is recorded only after the transition commits, so a
    /// rejected command may be retried under the same id.
    pub fn execute(
        &self,
        origin: SessionId,
        cache: &mut IdempotencyCache,
        envelope: &CommandEnvelope,
    ) -> CommandResult<Value> {
        if let Some(request_id) = &envelope.request_id {
            if cache.contains(request_id) {
                metrics::inc_duplicates_gated();
                return Err(CommandError::Duplicate(request_id.clone()));
            }
        }

        let command = parse(envelope)?;
        let key = command.key().to_string();

        let committed = if let ParsedCommand::Merge { state, .. } = &command {
            self.registry.merge(&key, state, origin)?
        } else {
            self.registry.get_or_create(&key, command.kind())?;
            self.registry.update(&key, origin, |r| match &command {
                ParsedCommand::Increment { node_id, .. } => r.increment_by(node_id, 1),
                ParsedCommand::IncrementBy { node_id, amount, .. } => {
                    r.increment_by(node_id, *amount)
                }
                ParsedCommand::Decrement { node_id, .. } => r.decrement_by(node_id, 1),
                ParsedCommand::Set { node_id, value, .. } => r.set(value.clone(), node_id),
                ParsedCommand::Add { node_id, element, .. } => r.add(element, node_id),
                ParsedCommand::Remove { element, .. } => r.remove(element),
                ParsedCommand::Merge { state, .. } => r.merge(state),
            })?
        };

        if let Some(request_id) = &envelope.request_id {
            cache.record(request_id);
        }
        metrics::inc_commands_processed();
        debug!(
            command = %envelope.command_type,
            key = %key,
            version = committed.version(),
            "Command committed"
        );

        Ok(json!({
            "state": encode(&committed),
            "value": committed.value(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    fn processor() -> (CommandProcessor, Arc<Registry>) {
        let registry = Arc::new(Registry::new());
        (CommandProcessor::new(Arc::clone(&registry)), registry)
    }

    fn cache() -> IdempotencyCache {
        IdempotencyCache::new(Duration::from_secs(60), 1000)
    }

    fn payload(fields: Value) -> Map<String, Value> {
        fields.as_object().cloned().unwrap_or_default()
    }

    fn envelope(event: &str, fields: Value, request_id: Option<&str>) -> CommandEnvelope {
        CommandEnvelope::for_event(event, payload(fields), request_id.map(String::from))
    }

    #[test]
    fn test_increment_creates_and_advances() {
        let (processor, registry) = processor();
        let mut cache = cache();

        let data = processor
            .execute(
                Uuid::new_v4(),
                &mut cache,
                &envelope("increment", json!({"key": "c1", "node_id": "A"}), None),
            )
            .unwrap();

        assert_eq!(data["value"], json!(1));
        assert_eq!(data["state"]["payload"]["counts"], json!({"A": 1}));
        assert_eq!(registry.get("c1").unwrap().value(), json!(1));
    }

    #[test]
    fn test_missing_field_has_no_side_effects() {
        let (processor, registry) = processor();
        let err = processor
            .execute(
                Uuid::new_v4(),
                &mut cache(),
                &envelope("increment", json!({"node_id": "A"}), None),
            )
            .unwrap_err();
        assert_eq!(err.error_code(), "missing_field");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_negative_amount_is_rejected() {
        let (processor, registry) = processor();
        let err = processor
            .execute(
                Uuid::new_v4(),
                &mut cache(),
                &envelope(
                    "increment_by",
                    json!({"key": "c1", "node_id": "A", "amount": -3}),
                    None,
                ),
            )
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_command");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_command() {
        let (processor, _registry) = processor();
        let err = processor
            .execute(
                Uuid::new_v4(),
                &mut cache(),
                &envelope("promote", json!({"key": "c1"}), None),
            )
            .unwrap_err();
        assert_eq!(err.error_code(), "unknown_command");
    }

    #[test]
    fn test_decrement_on_gcounter_is_kind_mismatch() {
        let (processor, registry) = processor();
        let mut cache = cache();
        let origin = Uuid::new_v4();

        processor
            .execute(
                origin,
                &mut cache,
                &envelope("increment", json!({"key": "c1", "node_id": "A"}), None),
            )
            .unwrap();

        let err = processor
            .execute(
                origin,
                &mut cache,
                &envelope("decrement", json!({"key": "c1", "node_id": "A"}), None),
            )
            .unwrap_err();
        assert_eq!(err.error_code(), "kind_mismatch");
        // Registry state unchanged.
        assert_eq!(registry.get("c1").unwrap().value(), json!(1));
    }

    #[test]
    fn test_duplicate_request_id_gates_second_execution() {
        let (processor, registry) = processor();
        let mut cache = cache();
        let origin = Uuid::new_v4();
        let envelope = envelope("increment", json!({"key": "c1", "node_id": "A"}), Some("r7"));

        processor.execute(origin, &mut cache, &envelope).unwrap();
        let err = processor.execute(origin, &mut cache, &envelope).unwrap_err();

        assert_eq!(err.error_code(), "duplicate");
        assert_eq!(registry.get("c1").unwrap().value(), json!(1));
    }

    #[test]
    fn test_rejected_command_may_retry_same_id() {
        let (processor, _registry) = processor();
        let mut cache = cache();
        let origin = Uuid::new_v4();

        let bad = envelope("increment", json!({"node_id": "A"}), Some("r9"));
        assert!(processor.execute(origin, &mut cache, &bad).is_err());

        let good = envelope("increment", json!({"key": "c1", "node_id": "A"}), Some("r9"));
        assert!(processor.execute(origin, &mut cache, &good).is_ok());
    }

    #[test]
    fn test_merge_installs_incoming_state() {
        let (processor, registry) = processor();
        let mut incoming = Replica::empty(ReplicaKind::OrSet);
        incoming.add("x", "A").unwrap();

        let data = processor
            .execute(
                Uuid::new_v4(),
                &mut cache(),
                &envelope(
                    "merge",
                    json!({"key": "s1", "state": encode(&incoming)}),
                    None,
                ),
            )
            .unwrap();

        assert_eq!(data["value"], json!(["x"]));
        assert!(registry.get("s1").unwrap().same_state(&incoming));
    }

    #[test]
    fn test_merge_unknown_kind_is_invalid_command() {
        let (processor, _registry) = processor();
        let err = processor
            .execute(
                Uuid::new_v4(),
                &mut cache(),
                &envelope(
                    "merge",
                    json!({"key": "s1", "state": {"kind": "bitmap", "payload": {}}}),
                    None,
                ),
            )
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_command");
    }

    #[test]
    fn test_set_accepts_null_value() {
        let (processor, _registry) = processor();
        let data = processor
            .execute(
                Uuid::new_v4(),
                &mut cache(),
                &envelope(
                    "set",
                    json!({"key": "r1", "node_id": "A", "value": null}),
                    None,
                ),
            )
            .unwrap();
        assert_eq!(data["value"], json!(null));
    }
}
