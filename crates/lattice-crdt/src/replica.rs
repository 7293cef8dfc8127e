//! Kind-tagged replica values.
//!
//! A [`Replica`] bundles one of the four CRDT states with an advisory version
//! counter that bumps on every local operation. Version is observability
//! only: merge, equality-of-state, and the wire round-trip all treat it as
//! metadata.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::counter::{GCounter, PnCounter};
use crate::error::CrdtError;
use crate::orset::OrSet;
use crate::register::LwwRegister;

/// The four CRDT kinds this kernel implements.
///
/// The wire name of each kind is its snake_case tag (`g_counter`,
/// `pn_counter`, `lww_register`, `or_set`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaKind {
    GCounter,
    PnCounter,
    LwwRegister,
    OrSet,
}

impl ReplicaKind {
    /// The wire tag for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GCounter => "g_counter",
            Self::PnCounter => "pn_counter",
            Self::LwwRegister => "lww_register",
            Self::OrSet => "or_set",
        }
    }

    /// Parse a wire tag; unknown tags are a typed error so callers can
    /// reject them without panicking.
    pub fn parse(tag: &str) -> Result<Self, CrdtError> {
        match tag {
            "g_counter" => Ok(Self::GCounter),
            "pn_counter" => Ok(Self::PnCounter),
            "lww_register" => Ok(Self::LwwRegister),
            "or_set" => Ok(Self::OrSet),
            other => Err(CrdtError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for ReplicaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the four CRDT states.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaState {
    GCounter(GCounter),
    PnCounter(PnCounter),
    LwwRegister(LwwRegister),
    OrSet(OrSet),
}

impl ReplicaState {
    /// The kind tag of this state.
    #[must_use]
    pub fn kind(&self) -> ReplicaKind {
        match self {
            Self::GCounter(_) => ReplicaKind::GCounter,
            Self::PnCounter(_) => ReplicaKind::PnCounter,
            Self::LwwRegister(_) => ReplicaKind::LwwRegister,
            Self::OrSet(_) => ReplicaKind::OrSet,
        }
    }
}

/// A kind-tagged CRDT value plus its advisory version.
#[derive(Debug, Clone, PartialEq)]
pub struct Replica {
    state: ReplicaState,
    version: u64,
}

impl Replica {
    /// The merge identity of `kind`, at version zero.
    #[must_use]
    pub fn empty(kind: ReplicaKind) -> Self {
        let state = match kind {
            ReplicaKind::GCounter => ReplicaState::GCounter(GCounter::new()),
            ReplicaKind::PnCounter => ReplicaState::PnCounter(PnCounter::new()),
            ReplicaKind::LwwRegister => ReplicaState::LwwRegister(LwwRegister::new()),
            ReplicaKind::OrSet => ReplicaState::OrSet(OrSet::new()),
        };
        Self { state, version: 0 }
    }

    /// Rebuild from a decoded state and version.
    #[must_use]
    pub fn from_state(state: ReplicaState, version: u64) -> Self {
        Self { state, version }
    }

    /// The kind tag.
    #[must_use]
    pub fn kind(&self) -> ReplicaKind {
        self.state.kind()
    }

    /// Advisory version; bumps on every local operation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Borrow the inner state.
    #[must_use]
    pub fn state(&self) -> &ReplicaState {
        &self.state
    }

    /// State equality that ignores the advisory version.
    #[must_use]
    pub fn same_state(&self, other: &Self) -> bool {
        self.state == other.state
    }

    /// The queryable value of this replica:
    /// counter sum, register payload, or sorted element list.
    #[must_use]
    pub fn value(&self) -> Value {
        match &self.state {
            ReplicaState::GCounter(c) => json!(c.value()),
            ReplicaState::PnCounter(c) => json!(c.value()),
            ReplicaState::LwwRegister(r) => r.value().clone(),
            ReplicaState::OrSet(s) => Value::Array(
                s.iter().map(|e| Value::String(e.to_string())).collect(),
            ),
        }
    }

    fn mismatch(&self, actual: ReplicaKind) -> CrdtError {
        CrdtError::KindMismatch {
            expected: self.kind(),
            actual,
        }
    }

    /// Raise a grow-only counter entry for `node` by `amount`.
    pub fn increment_by(&mut self, node: &str, amount: u64) -> Result<(), CrdtError> {
        match &mut self.state {
            ReplicaState::GCounter(c) => {
                c.increment_by(node, amount);
                self.version += 1;
                Ok(())
            }
            other => Err(CrdtError::KindMismatch {
                expected: ReplicaKind::GCounter,
                actual: other.kind(),
            }),
        }
    }

    /// Lower a positive-negative counter for `node` by `amount`.
    pub fn decrement_by(&mut self, node: &str, amount: u64) -> Result<(), CrdtError> {
        match &mut self.state {
            ReplicaState::PnCounter(c) => {
                c.decrement_by(node, amount);
                self.version += 1;
                Ok(())
            }
            other => Err(CrdtError::KindMismatch {
                expected: ReplicaKind::PnCounter,
                actual: other.kind(),
            }),
        }
    }

    /// Assign a register payload authored by `node`.
    pub fn set(&mut self, value: Value, node: &str) -> Result<(), CrdtError> {
        match &mut self.state {
            ReplicaState::LwwRegister(r) => {
                r.set(value, node);
                self.version += 1;
                Ok(())
            }
            other => Err(CrdtError::KindMismatch {
                expected: ReplicaKind::LwwRegister,
                actual: other.kind(),
            }),
        }
    }

    /// Add a set element under a fresh tag authored by `node`.
    pub fn add(&mut self, element: &str, node: &str) -> Result<(), CrdtError> {
        match &mut self.state {
            ReplicaState::OrSet(s) => {
                s.add(element, node);
                self.version += 1;
                Ok(())
            }
            other => Err(CrdtError::KindMismatch {
                expected: ReplicaKind::OrSet,
                actual: other.kind(),
            }),
        }
    }

    /// Remove a set element's observed tags.
    pub fn remove(&mut self, element: &str) -> Result<(), CrdtError> {
        match &mut self.state {
            ReplicaState::OrSet(s) => {
                s.remove(element);
                self.version += 1;
                Ok(())
            }
            other => Err(CrdtError::KindMismatch {
                expected: ReplicaKind::OrSet,
                actual: other.kind(),
            }),
        }
    }

    /// Merge another replica of the same kind into this one.
    ///
    /// Fails with `KindMismatch` (and leaves this replica untouched) when the
    /// kinds disagree.
    pub fn merge(&mut self, other: &Self) -> Result<(), CrdtError> {
        match (&mut self.state, &other.state) {
            (ReplicaState::GCounter(a), ReplicaState::GCounter(b)) => a.merge(b),
            (ReplicaState::PnCounter(a), ReplicaState::PnCounter(b)) => a.merge(b),
            (ReplicaState::LwwRegister(a), ReplicaState::LwwRegister(b)) => a.merge(b),
            (ReplicaState::OrSet(a), ReplicaState::OrSet(b)) => a.merge(b),
            _ => return Err(self.mismatch(other.kind())),
        }
        self.version = self.version.max(other.version) + 1;
        Ok(())
    }

    /// The minimal replica that merged into `older` yields `self`.
    ///
    /// Carries `self`'s version so the receiver can observe how far ahead
    /// the origin is.
    pub fn delta_since(&self, older: &Self) -> Result<Self, CrdtError> {
        let state = match (&self.state, &older.state) {
            (ReplicaState::GCounter(a), ReplicaState::GCounter(b)) => {
                ReplicaState::GCounter(a.delta_since(b))
            }
            (ReplicaState::PnCounter(a), ReplicaState::PnCounter(b)) => {
                ReplicaState::PnCounter(a.delta_since(b))
            }
            (ReplicaState::LwwRegister(a), ReplicaState::LwwRegister(b)) => {
                ReplicaState::LwwRegister(a.delta_since(b))
            }
            (ReplicaState::OrSet(a), ReplicaState::OrSet(b)) => {
                ReplicaState::OrSet(a.delta_since(b))
            }
            _ => return Err(self.mismatch(older.kind())),
        };
        Ok(Self {
            state,
            version: self.version,
        })
    }
}
