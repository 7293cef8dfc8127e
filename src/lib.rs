//! latticed - Lattice Daemon.
//!
//! A server-side coordination point for browser-as-peer collaborative
//! applications. Shared state is encoded exclusively in CRDTs (see the
//! `lattice-crdt` crate), so peers and the server can diverge during a
//! partition and reconverge on reconnect without a designated authority.
//!
//! The library target exists so integration tests and embedders can run
//! the full server in-process; the `latticed` binary is a thin wrapper
//! around [`network::Gateway`].

pub mod commands;
pub mod config;
pub mod error;
pub mod metrics;
pub mod network;
pub mod policy;
pub mod protocol;
pub mod session;
pub mod state;

pub use config::Config;
pub use network::Gateway;
pub use state::Core;
