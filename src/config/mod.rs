//! Configuration loading and management.
//!
//! TOML file with three sections:
//! - `[server]`: bind address, metrics port, log format, default CRDT kind
//! - `[channel]`: per-session delivery and idempotency tuning
//! - `[profiles.*]`: delivery-profile overrides
//!
//! Every field has a documented default; the server runs with no
//! configuration file at all.

mod defaults;

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::policy::ProfileConfigs;
use lattice_crdt::ReplicaKind;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub channel: ChannelConfig,
    pub profiles: ProfileConfigs,
}

/// Server identity and listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the websocket gateway binds.
    pub bind: String,
    /// Port for the Prometheus endpoint; 0 disables it.
    pub metrics_port: u16,
    /// Log output format.
    pub log_format: LogFormat,
    /// CRDT kind a join presents for a key no command has bound yet.
    pub default_kind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: defaults::default_bind(),
            metrics_port: defaults::default_metrics_port(),
            log_format: LogFormat::default(),
            default_kind: defaults::default_default_kind(),
        }
    }
}

/// Per-session channel tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Broadcast queue depth per subscriber; overflow drops updates.
    pub subscriber_buffer: usize,
    /// Inactivity window in seconds; at least one frame must move in it.
    pub keepalive_secs: u64,
    /// Outbound send deadline in seconds before the session counts as
    /// backpressured.
    pub send_timeout_secs: u64,
    /// Idempotency window duration in seconds.
    pub idempotency_ttl_secs: u64,
    /// Idempotency window entry cap.
    pub idempotency_max_entries: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: defaults::default_subscriber_buffer(),
            keepalive_secs: defaults::default_keepalive_secs(),
            send_timeout_secs: defaults::default_send_timeout_secs(),
            idempotency_ttl_secs: defaults::default_idempotency_ttl_secs(),
            idempotency_max_entries: defaults::default_idempotency_max_entries(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(Path::new(path))?;
        let config: Self = toml::from_str(&raw)?;
        Ok(config)
    }

    /// The configured bind address, parsed.
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.server.bind.parse()?)
    }

    /// The configured default CRDT kind, parsed.
    pub fn default_kind(&self) -> anyhow::Result<ReplicaKind> {
        Ok(ReplicaKind::parse(&self.server.default_kind)?)
    }
}

/// Validate a configuration, collecting every problem.
pub fn validate(config: &Config) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.server.bind.parse::<SocketAddr>().is_err() {
        errors.push(format!("server.bind is not a socket address: {}", config.server.bind));
    }
    if ReplicaKind::parse(&config.server.default_kind).is_err() {
        errors.push(format!(
            "server.default_kind is not a CRDT kind: {}",
            config.server.default_kind
        ));
    }
    if config.channel.subscriber_buffer == 0 {
        errors.push("channel.subscriber_buffer must be at least 1".to_string());
    }
    if config.channel.keepalive_secs == 0 {
        errors.push("channel.keepalive_secs must be at least 1".to_string());
    }
    if config.channel.send_timeout_secs == 0 {
        errors.push("channel.send_timeout_secs must be at least 1".to_string());
    }
    if config.channel.idempotency_max_entries == 0 {
        errors.push("channel.idempotency_max_entries must be at least 1".to_string());
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
