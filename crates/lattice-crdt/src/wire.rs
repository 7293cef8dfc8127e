//! JSON wire codec for replicas.
//!
//! The envelope is `{kind, payload, version}` with snake_case field names.
//! Decoding is tolerant of absent advisory fields (`version`, a register's
//! `author`) and rejects unknown kinds with a typed error instead of
//! guessing. `decode(encode(x))` reproduces `x` exactly, version included.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::counter::{GCounter, PnCounter};
use crate::error::CrdtError;
use crate::orset::{OrSet, Tag};
use crate::register::LwwRegister;
use crate::replica::{Replica, ReplicaKind, ReplicaState};

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    kind: String,
    payload: Value,
    #[serde(default)]
    version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct GCounterPayload {
    #[serde(default)]
    counts: BTreeMap<String, u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PnCounterPayload {
    #[serde(default)]
    positive: BTreeMap<String, u64>,
    #[serde(default)]
    negative: BTreeMap<String, u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LwwPayload {
    #[serde(default)]
    value: Value,
    #[serde(default)]
    timestamp: u64,
    #[serde(default)]
    author: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OrSetPayload {
    #[serde(default)]
    elements: BTreeMap<String, BTreeSet<Tag>>,
}

fn counts_of(counter: &GCounter) -> BTreeMap<String, u64> {
    counter
        .entries()
        .map(|(node, count)| (node.to_string(), count))
        .collect()
}

fn counter_from(counts: BTreeMap<String, u64>) -> GCounter {
    let mut counter = GCounter::new();
    for (node, count) in counts {
        counter.increment_by(&node, count);
    }
    counter
}

/// Encode a replica into its wire envelope.
///
/// Infallible: every in-memory replica has a wire form.
#[must_use]
pub fn encode(replica: &Replica) -> Value {
    let payload = match replica.state() {
        ReplicaState::GCounter(c) => serde_json::json!({ "counts": counts_of(c) }),
        ReplicaState::PnCounter(c) => serde_json::json!({
            "positive": counts_of(c.positive()),
            "negative": counts_of(c.negative()),
        }),
        ReplicaState::LwwRegister(r) => serde_json::json!({
            "value": r.value(),
            "timestamp": r.timestamp(),
            "author": r.author(),
        }),
        ReplicaState::OrSet(s) => {
            let elements: BTreeMap<&str, &BTreeSet<Tag>> = s.entries().collect();
            serde_json::json!({ "elements": elements })
        }
    };
    serde_json::json!({
        "kind": replica.kind().as_str(),
        "payload": payload,
        "version": replica.version(),
    })
}

/// Decode a wire envelope into a replica.
pub fn decode(wire: &Value) -> Result<Replica, CrdtError> {
    let envelope: Envelope = serde_json::from_value(wire.clone())
        .map_err(|e| CrdtError::MalformedEnvelope(e.to_string()))?;
    let kind = ReplicaKind::parse(&envelope.kind)?;

    let malformed = |e: serde_json::Error| CrdtError::MalformedPayload {
        kind,
        detail: e.to_string(),
    };

    let state = match kind {
        ReplicaKind::GCounter => {
            let payload: GCounterPayload =
                serde_json::from_value(envelope.payload).map_err(malformed)?;
            ReplicaState::GCounter(counter_from(payload.counts))
        }
        ReplicaKind::PnCounter => {
            let payload: PnCounterPayload =
                serde_json::from_value(envelope.payload).map_err(malformed)?;
            ReplicaState::PnCounter(PnCounter::from_parts(
                counter_from(payload.positive),
                counter_from(payload.negative),
            ))
        }
        ReplicaKind::LwwRegister => {
            let payload: LwwPayload =
                serde_json::from_value(envelope.payload).map_err(malformed)?;
            ReplicaState::LwwRegister(LwwRegister::from_parts(
                payload.value,
                payload.timestamp,
                payload.author,
            ))
        }
        ReplicaKind::OrSet => {
            let payload: OrSetPayload =
                serde_json::from_value(envelope.payload).map_err(malformed)?;
            ReplicaState::OrSet(OrSet::from_entries(payload.elements))
        }
    };

    Ok(Replica::from_state(state, envelope.version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_all_kinds() {
        let mut gc = Replica::empty(ReplicaKind::GCounter);
        gc.increment_by("A", 3).unwrap();

        let mut pn = Replica::empty(ReplicaKind::PnCounter);
        pn.increment_by("A", 2).unwrap();
        pn.decrement_by("B", 7).unwrap();

        let mut lww = Replica::empty(ReplicaKind::LwwRegister);
        lww.set(json!({"title": "doc"}), "nA").unwrap();

        let mut set = Replica::empty(ReplicaKind::OrSet);
        set.add("x", "A").unwrap();
        set.add("y", "B").unwrap();
        set.remove("y").unwrap();

        for replica in [gc, pn, lww, set] {
            let decoded = decode(&encode(&replica)).unwrap();
            assert_eq!(decoded, replica);
        }
    }

    #[test]
    fn test_wire_shape_gcounter() {
        let mut replica = Replica::empty(ReplicaKind::GCounter);
        replica.increment_by("A", 3).unwrap();
        replica.increment_by("B", 5).unwrap();

        let wire = encode(&replica);
        assert_eq!(wire["kind"], "g_counter");
        assert_eq!(wire["payload"]["counts"], json!({"A": 3, "B": 5}));
        assert_eq!(wire["version"], 2);
    }

    #[test]
    fn test_decode_tolerates_missing_version_and_author() {
        let wire = json!({
            "kind": "lww_register",
            "payload": {"value": "v", "timestamp": 9},
        });
        let replica = decode(&wire).unwrap();
        assert_eq!(replica.version(), 0);
        match replica.state() {
            ReplicaState::LwwRegister(r) => {
                assert_eq!(r.author(), "");
                assert_eq!(r.timestamp(), 9);
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let wire = json!({"kind": "bitmap", "payload": {}});
        assert_eq!(
            decode(&wire).unwrap_err(),
            CrdtError::UnknownKind("bitmap".into())
        );
    }

    #[test]
    fn test_decode_rejects_malformed_payload() {
        let wire = json!({"kind": "g_counter", "payload": {"counts": {"A": "three"}}});
        let err = decode(&wire).unwrap_err();
        assert!(matches!(err, CrdtError::MalformedPayload { .. }));
    }

    #[test]
    fn test_decode_rejects_non_envelope() {
        let err = decode(&json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, CrdtError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_empty_gcounter_payload_decodes() {
        // A joining peer may send the state it was handed at join time,
        // which for a fresh key is an empty counts map.
        let wire = json!({"kind": "g_counter", "payload": {"counts": {}}, "version": 0});
        let replica = decode(&wire).unwrap();
        assert!(replica.same_state(&Replica::empty(ReplicaKind::GCounter)));
    }
}
