//! Capability negotiation: mapping peer capability reports to delivery
//! profiles.
//!
//! Browsers report what they can do once at connect time; the policy assigns
//! each peer one of three delivery profiles that control update cadence and
//! batching. Profile assignment is a pure function; the table only records
//! the outcome so operators can inspect it.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Physical connection type reported by the peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    Ethernet,
    Cellular,
    #[default]
    Unknown,
}

/// Effective bandwidth class reported by the peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectiveType {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    #[default]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
}

/// What a peer reported about its runtime environment.
///
/// Absent fields decode to the weakest answer, so a peer that reports
/// nothing lands in the minimal profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityReport {
    #[serde(default)]
    pub has_workers: bool,
    #[serde(default)]
    pub has_sab: bool,
    #[serde(default)]
    pub has_web_transport: bool,
    #[serde(default)]
    pub memory_mb: u64,
    #[serde(default)]
    pub connection: ConnectionType,
    #[serde(default)]
    pub effective: EffectiveType,
}

/// Delivery profile assigned to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Full,
    Constrained,
    Minimal,
}

impl Profile {
    /// Wire name of the profile.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Constrained => "constrained",
            Self::Minimal => "minimal",
        }
    }
}

/// Delivery parameters attached to a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub update_ms: u64,
    pub batch_events: bool,
    pub delta_sync: bool,
    pub server_render: bool,
    pub max_batch_size: u32,
}

/// The config table for all three profiles.
///
/// Each profile can be overridden independently in the config file; absent
/// sections keep the stock cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfigs {
    #[serde(default = "default_full")]
    pub full: ProfileConfig,
    #[serde(default = "default_constrained")]
    pub constrained: ProfileConfig,
    #[serde(default = "default_minimal")]
    pub minimal: ProfileConfig,
}

fn default_full() -> ProfileConfig {
    ProfileConfig {
        update_ms: 16,
        batch_events: false,
        delta_sync: true,
        server_render: false,
        max_batch_size: 1,
    }
}

fn default_constrained() -> ProfileConfig {
    ProfileConfig {
        update_ms: 100,
        batch_events: true,
        delta_sync: true,
        server_render: false,
        max_batch_size: 10,
    }
}

fn default_minimal() -> ProfileConfig {
    ProfileConfig {
        update_ms: 1000,
        batch_events: true,
        delta_sync: false,
        server_render: true,
        max_batch_size: 50,
    }
}

impl Default for ProfileConfigs {
    fn default() -> Self {
        Self {
            full: default_full(),
            constrained: default_constrained(),
            minimal: default_minimal(),
        }
    }
}

impl ProfileConfigs {
    /// Look up the config for a profile.
    #[must_use]
    pub fn get(&self, profile: Profile) -> ProfileConfig {
        match profile {
            Profile::Full => self.full,
            Profile::Constrained => self.constrained,
            Profile::Minimal => self.minimal,
        }
    }
}

/// Assign a delivery profile from a capability report. First match wins.
#[must_use]
pub fn assign_profile(report: &CapabilityReport) -> Profile {
    let fast_link = matches!(
        report.connection,
        ConnectionType::Wifi | ConnectionType::Ethernet
    ) || report.effective == EffectiveType::FourG;

    if report.has_workers && report.has_sab && report.memory_mb >= 2048 && fast_link {
        Profile::Full
    } else if report.has_workers && report.memory_mb >= 512 {
        Profile::Constrained
    } else {
        Profile::Minimal
    }
}

/// One registered peer.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub report: CapabilityReport,
    pub profile: Profile,
    pub registered_at: DateTime<Utc>,
}

/// In-memory table of registered peers and their profiles.
///
/// Touched only on connect, capability update, and disconnect.
pub struct PolicyTable {
    peers: DashMap<String, PeerRecord>,
    configs: ProfileConfigs,
}

impl PolicyTable {
    /// Create a table serving the given profile configs.
    #[must_use]
    pub fn new(configs: ProfileConfigs) -> Self {
        Self {
            peers: DashMap::new(),
            configs,
        }
    }

    /// Register a peer at connect time; returns its assigned profile.
    pub fn register(&self, node_id: &str, report: CapabilityReport) -> Profile {
        let profile = assign_profile(&report);
        self.peers.insert(
            node_id.to_string(),
            PeerRecord {
                report,
                profile,
                registered_at: Utc::now(),
            },
        );
        info!(node_id = %node_id, profile = %profile.as_str(), "Peer registered");
        profile
    }

    /// Re-evaluate a peer's profile from a fresh report.
    ///
    /// A changed assignment is logged; nothing is signalled through the
    /// channel.
    pub fn update(&self, node_id: &str, report: CapabilityReport) -> Profile {
        let profile = assign_profile(&report);
        if let Some(mut record) = self.peers.get_mut(node_id) {
            if record.profile != profile {
                info!(
                    node_id = %node_id,
                    from = %record.profile.as_str(),
                    to = %profile.as_str(),
                    "Peer profile changed"
                );
            }
            record.report = report;
            record.profile = profile;
        } else {
            self.peers.insert(
                node_id.to_string(),
                PeerRecord {
                    report,
                    profile,
                    registered_at: Utc::now(),
                },
            );
        }
        profile
    }

    /// Drop a peer's registration.
    pub fn unregister(&self, node_id: &str) {
        self.peers.remove(node_id);
    }

    /// The peer's current record, if registered.
    #[must_use]
    pub fn get(&self, node_id: &str) -> Option<PeerRecord> {
        self.peers.get(node_id).map(|r| r.value().clone())
    }

    /// Number of registered peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True when no peer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// The delivery config for a profile.
    #[must_use]
    pub fn config_for(&self, profile: Profile) -> ProfileConfig {
        self.configs.get(profile)
    }
}
