//! Typed errors for replica operations and the wire codec.

use thiserror::Error;

use crate::replica::ReplicaKind;

/// Errors surfaced by replica operations and `encode`/`decode`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrdtError {
    /// Two replicas (or a replica and an operation) disagree on kind.
    #[error("kind mismatch: expected {expected}, got {actual}")]
    KindMismatch {
        expected: ReplicaKind,
        actual: ReplicaKind,
    },

    /// The wire envelope names a kind this kernel does not implement.
    #[error("unknown CRDT kind: {0}")]
    UnknownKind(String),

    /// The payload does not match the envelope's kind.
    #[error("malformed {kind} payload: {detail}")]
    MalformedPayload { kind: ReplicaKind, detail: String },

    /// The envelope itself is not the expected `{kind, payload, version}`
    /// shape.
    #[error("malformed wire envelope: {0}")]
    MalformedEnvelope(String),
}

impl CrdtError {
    /// Stable error-code string for wire replies and metric labels.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::KindMismatch { .. } => "kind_mismatch",
            Self::UnknownKind(_) => "unknown_kind",
            Self::MalformedPayload { .. } | Self::MalformedEnvelope(_) => "invalid_state",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        let err = CrdtError::KindMismatch {
            expected: ReplicaKind::GCounter,
            actual: ReplicaKind::OrSet,
        };
        assert_eq!(err.error_code(), "kind_mismatch");
        assert_eq!(CrdtError::UnknownKind("bitmap".into()).error_code(), "unknown_kind");
    }

    #[test]
    fn test_kind_mismatch_display_names_kinds() {
        let err = CrdtError::KindMismatch {
            expected: ReplicaKind::GCounter,
            actual: ReplicaKind::PnCounter,
        };
        assert_eq!(err.to_string(), "kind mismatch: expected g_counter, got pn_counter");
    }
}
