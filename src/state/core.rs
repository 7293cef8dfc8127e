//! The Core - shared service container for the server.
//!
//! Holds the three long-lived services every session needs: the replica
//! registry, the capability policy table, and the command processor. One
//! Core is created per deployment and handed to sessions as an explicit
//! `Arc`; there is no global mutable state.

use std::sync::Arc;

use crate::commands::CommandProcessor;
use crate::config::Config;
use crate::policy::PolicyTable;
use crate::state::registry::Registry;
use lattice_crdt::ReplicaKind;

/// Shared service container.
pub struct Core {
    /// Replica storage and pub/sub.
    pub registry: Arc<Registry>,

    /// Peer capability table.
    pub policy: PolicyTable,

    /// Command validation and dispatch.
    pub processor: CommandProcessor,

    /// Server configuration.
    pub config: Config,

    /// CRDT kind a join presents for keys no command has bound yet.
    pub default_kind: ReplicaKind,
}

impl Core {
    /// Build the service container from a validated configuration.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let default_kind = config.default_kind()?;
        let registry = Arc::new(Registry::new());
        let processor = CommandProcessor::new(Arc::clone(&registry));
        let policy = PolicyTable::new(config.profiles);

        Ok(Self {
            registry,
            policy,
            processor,
            config,
            default_kind,
        })
    }
}
