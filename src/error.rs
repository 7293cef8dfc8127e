//! Unified error handling for latticed.
//!
//! Two tiers, mirroring the protocol's recovery contract: [`CommandError`]
//! values are recoverable and turn into structured error replies on the
//! originating session, while [`SessionError`] values are fatal and close
//! the session with a reason code the peer can distinguish from network
//! loss.

use thiserror::Error;

use crate::state::registry::RegistryError;
use lattice_crdt::CrdtError;

/// Recoverable command-level failures.
///
/// Every variant maps to one of the stable wire error kinds; the session
/// stays open after reporting one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The envelope shape is wrong (bad field type, unknown CRDT kind in a
    /// merge payload, malformed state).
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// A required payload field is absent.
    #[error("missing field: {0}")]
    MissingField(String),

    /// The command type is not one this server implements.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The key is bound to a different CRDT kind.
    #[error("kind mismatch: expected {expected}, got {actual}")]
    KindMismatch { expected: String, actual: String },

    /// The key has no replica.
    #[error("no replica for key: {0}")]
    NotFound(String),

    /// The request id was already processed inside the idempotency window.
    #[error("duplicate request: {0}")]
    Duplicate(String),

    /// Connect-time or topic-level rejection.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A bug or unexpected condition.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CommandError {
    /// Stable error-kind string for wire replies and metric labels.
    #[inline]
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCommand(_) => "invalid_command",
            Self::MissingField(_) => "missing_field",
            Self::UnknownCommand(_) => "unknown_command",
            Self::KindMismatch { .. } => "kind_mismatch",
            Self::NotFound(_) => "not_found",
            Self::Duplicate(_) => "duplicate",
            Self::Unauthorized(_) => "unauthorized",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<CrdtError> for CommandError {
    fn from(err: CrdtError) -> Self {
        match err {
            CrdtError::KindMismatch { expected, actual } => Self::KindMismatch {
                expected: expected.as_str().to_string(),
                actual: actual.as_str().to_string(),
            },
            CrdtError::UnknownKind(kind) => {
                Self::InvalidCommand(format!("unknown CRDT kind: {kind}"))
            }
            CrdtError::MalformedPayload { kind, detail } => {
                Self::InvalidCommand(format!("malformed {kind} state: {detail}"))
            }
            CrdtError::MalformedEnvelope(detail) => {
                Self::InvalidCommand(format!("malformed state envelope: {detail}"))
            }
        }
    }
}

impl From<RegistryError> for CommandError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(key) => Self::NotFound(key),
            RegistryError::Crdt(inner) => inner.into(),
        }
    }
}

/// Result type for command execution.
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Session Errors (fatal)
// ============================================================================

/// Fatal session-level failures. The session transitions to CLOSED and all
/// of its registrations are released.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("undecodable inbound frame: {0}")]
    Decode(String),

    #[error("outbound backpressure threshold exceeded")]
    Backpressure,

    #[error("keepalive window expired")]
    IdleTimeout,

    #[error("rejected: {0}")]
    Unauthorized(String),

    #[error("server shutting down")]
    Shutdown,
}

impl SessionError {
    /// Reason code carried in the close frame.
    #[inline]
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport_error",
            Self::Decode(_) => "decode_error",
            Self::Backpressure => "backpressure",
            Self::IdleTimeout => "idle_timeout",
            Self::Unauthorized(_) => "unauthorized",
            Self::Shutdown => "shutdown",
        }
    }
}
