//! Conflict-free Replicated Data Types (CRDTs) for collaborative state.
//!
//! This crate is the data-type kernel of `latticed`: a small family of
//! state-based CRDTs with identical semantics on the server and on every
//! browser peer, so replicas can diverge during a partition and reconverge
//! on reconnect without a designated authority.
//!
//! # Architecture
//!
//! The kernel sits between the replica registry and the wire:
//!
//! ```text
//! ┌─────────────────────┐      ┌─────────────────────┐
//! │  Command processor  │      │   Replica registry  │
//! │  (mutations)        │      │   (keyed storage)   │
//! └──────────┬──────────┘      └──────────┬──────────┘
//!            │                            │
//!            ▼                            ▼
//! ┌──────────────────────────────────────────────────┐
//! │              CRDT kernel (this crate)            │
//! │  ┌───────────┐ ┌───────────┐ ┌─────┐ ┌───────┐  │
//! │  │ GCounter  │ │ PnCounter │ │ LWW │ │ OrSet │  │
//! │  └───────────┘ └───────────┘ └─────┘ └───────┘  │
//! │        merge / delta / encode / decode           │
//! └──────────────────────────────────────────────────┘
//!            │
//!            ▼
//! ┌──────────────────────────────────────────────────┐
//! │     JSON wire envelope {kind, payload, version}  │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! # Data types
//!
//! - **`GCounter`**: grow-only counter; merge is entry-wise max.
//! - **`PnCounter`**: increment/decrement counter built from two `GCounter`s.
//! - **`LwwRegister`**: last-writer-wins scalar with deterministic tie-break.
//! - **`OrSet`**: observed-remove set with add-wins semantics.
//!
//! Every merge is commutative, associative, and idempotent; every mutator is
//! inflationary except `OrSet::remove`, which drops observed tags instead of
//! inflating. The property tests in `tests/semilattice.rs` check these laws
//! with randomized inputs.

pub mod counter;
pub mod error;
pub mod orset;
pub mod register;
pub mod replica;
pub mod wire;

pub use counter::{GCounter, PnCounter};
pub use error::CrdtError;
pub use orset::{OrSet, Tag};
pub use register::LwwRegister;
pub use replica::{Replica, ReplicaKind, ReplicaState};
pub use wire::{decode, encode};
