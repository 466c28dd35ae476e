// src/core/metrics.rs

//! Defines and registers Prometheus metrics for relay monitoring.
//!
//! This module uses `lazy_static` so the metrics are registered once for the
//! lifetime of the process.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, TextEncoder, register_counter, register_counter_vec,
    register_gauge,
};

lazy_static! {
    // --- Gauges ---
    /// Sockets currently open, authenticated or not.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("chatrelay_connected_clients", "Number of currently open connections.").unwrap();
    /// Clients currently present in the registry.
    pub static ref REGISTERED_CLIENTS: Gauge =
        register_gauge!("chatrelay_registered_clients", "Number of authenticated clients in the registry.").unwrap();
    /// Files stashed on disk waiting for their receiver.
    pub static ref PENDING_FILES: Gauge =
        register_gauge!("chatrelay_pending_files", "Number of files waiting for an offline receiver.").unwrap();

    // --- Counters ---
    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("chatrelay_connections_received_total", "Total number of connections accepted.").unwrap();
    pub static ref LOGINS_FAILED_TOTAL: Counter =
        register_counter!("chatrelay_logins_failed_total", "Total number of failed login attempts.").unwrap();
    /// Chat messages routed, labeled by `live` or `queued`.
    pub static ref MESSAGES_ROUTED_TOTAL: CounterVec =
        register_counter_vec!("chatrelay_messages_routed_total", "Total number of chat messages routed, labeled by path.", &["path"]).unwrap();
    /// File transfers completed, labeled by `relayed`, `stored` or `retrieved`.
    pub static ref FILES_TOTAL: CounterVec =
        register_counter_vec!("chatrelay_files_total", "Total number of file transfers, labeled by outcome.", &["outcome"]).unwrap();
    pub static ref FILE_BYTES_TRANSFERRED_TOTAL: Counter =
        register_counter!("chatrelay_file_bytes_transferred_total", "Total number of file payload bytes copied.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# failed to encode metrics: {e}\n"))
}
