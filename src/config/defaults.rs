//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

// =============================================================================
// Server Defaults
// =============================================================================

pub fn default_bind() -> String {
    "127.0.0.1:9120".to_string()
}

pub fn default_metrics_port() -> u16 {
    9600
}

pub fn default_default_kind() -> String {
    "g_counter".to_string()
}

// =============================================================================
// Channel Defaults
// =============================================================================

/// Broadcast queue depth per subscriber.
pub fn default_subscriber_buffer() -> usize {
    64
}

/// Inactivity window; a session that neither sends nor receives a frame
/// inside it is closed.
pub fn default_keepalive_secs() -> u64 {
    45
}

/// How long an outbound frame may sit in the socket before the session is
/// treated as backpressured.
pub fn default_send_timeout_secs() -> u64 {
    10
}

/// Idempotency window duration.
pub fn default_idempotency_ttl_secs() -> u64 {
    60
}

/// Idempotency window size cap.
pub fn default_idempotency_max_entries() -> usize {
    10_000
}
