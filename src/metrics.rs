//! Prometheus metrics for latticed.
//!
//! Tracks session population, command throughput, broadcast fan-out, and
//! replica counts, and serves the whole registry over HTTP via [`serve`].

use std::net::SocketAddr;

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry for all metrics.
    pub static ref REGISTRY: Registry = Registry::new();

    // ========================================================================
    // Counters (monotonic increasing)
    // ========================================================================

    /// Total commands processed successfully.
    pub static ref COMMANDS_PROCESSED: IntCounter = IntCounter::new(
        "lattice_commands_processed_total",
        "Commands processed successfully"
    ).unwrap();

    /// Total commands rejected with an error reply.
    pub static ref COMMANDS_REJECTED: IntCounter = IntCounter::new(
        "lattice_commands_rejected_total",
        "Commands rejected with an error reply"
    ).unwrap();

    /// Total duplicate requests gated by the idempotency window.
    pub static ref DUPLICATES_GATED: IntCounter = IntCounter::new(
        "lattice_duplicates_gated_total",
        "Duplicate requests gated by the idempotency window"
    ).unwrap();

    /// Total state broadcasts delivered to subscribers.
    pub static ref BROADCASTS_DELIVERED: IntCounter = IntCounter::new(
        "lattice_broadcasts_delivered_total",
        "State broadcasts delivered to subscribers"
    ).unwrap();

    /// Total state broadcasts dropped (slow or dead subscribers).
    pub static ref BROADCASTS_DROPPED: IntCounter = IntCounter::new(
        "lattice_broadcasts_dropped_total",
        "State broadcasts dropped for slow or dead subscribers"
    ).unwrap();

    // ========================================================================
    // Gauges (can increase/decrease)
    // ========================================================================

    /// Currently connected sessions.
    pub static ref ACTIVE_SESSIONS: IntGauge = IntGauge::new(
        "lattice_active_sessions",
        "Currently connected sessions"
    ).unwrap();

    /// Replicas currently stored in the registry.
    pub static ref ACTIVE_REPLICAS: IntGauge = IntGauge::new(
        "lattice_active_replicas",
        "Replicas currently stored in the registry"
    ).unwrap();
}

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at server startup before any metrics are recorded.
/// Registration failures mean a double init and are ignored.
pub fn init() {
    let _ = REGISTRY.register(Box::new(COMMANDS_PROCESSED.clone()));
    let _ = REGISTRY.register(Box::new(COMMANDS_REJECTED.clone()));
    let _ = REGISTRY.register(Box::new(DUPLICATES_GATED.clone()));
    let _ = REGISTRY.register(Box::new(BROADCASTS_DELIVERED.clone()));
    let _ = REGISTRY.register(Box::new(BROADCASTS_DROPPED.clone()));
    let _ = REGISTRY.register(Box::new(ACTIVE_SESSIONS.clone()));
    let _ = REGISTRY.register(Box::new(ACTIVE_REPLICAS.clone()));
}

/// Gather all metrics in Prometheus text format.
#[must_use]
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Serve the registry on `0.0.0.0:<port>/metrics` for scrape collection.
///
/// Runs until the process exits; spawn it as a background task next to the
/// gateway. Bind failure is logged and leaves the rest of the server up.
pub async fn serve(port: u16) {
    let router = Router::new().route("/metrics", get(|| async { gather_metrics() }));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Metrics endpoint failed to bind");
            return;
        }
    };
    tracing::info!(%addr, "Metrics endpoint ready");

    if let Err(e) = axum::serve(listener, router).await {
        tracing::error!(error = %e, "Metrics endpoint terminated");
    }
}

pub fn inc_active_sessions() {
    ACTIVE_SESSIONS.inc();
}

pub fn dec_active_sessions() {
    ACTIVE_SESSIONS.dec();
}

pub fn inc_active_replicas() {
    ACTIVE_REPLICAS.inc();
}

pub fn dec_active_replicas() {
    ACTIVE_REPLICAS.dec();
}

pub fn inc_commands_processed() {
    COMMANDS_PROCESSED.inc();
}

pub fn inc_commands_rejected() {
    COMMANDS_REJECTED.inc();
}

pub fn inc_duplicates_gated() {
    DUPLICATES_GATED.inc();
}

pub fn inc_broadcasts_delivered() {
    BROADCASTS_DELIVERED.inc();
}

pub fn inc_broadcasts_dropped() {
    BROADCASTS_DROPPED.inc();
}
