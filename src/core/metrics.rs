// src/core/metrics.rs

//! Defines and registers Prometheus metrics for controller monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire process lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, HistogramVec, TextEncoder, register_counter,
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
};

lazy_static! {
    // --- Controller-wide Gauges ---
    /// The number of client/daemon connections currently open.
    pub static ref CONNECTED_PEERS: Gauge =
        register_gauge!("latticed_connected_peers", "Number of currently connected peers.").unwrap();
    /// Job counts by lifecycle state.
    pub static ref JOBS_BY_STATE: GaugeVec =
        register_gauge_vec!("latticed_jobs", "Job counts by state.", &["state"]).unwrap();
    /// Node counts by base state.
    pub static ref NODES_BY_STATE: GaugeVec =
        register_gauge_vec!("latticed_nodes", "Node counts by state.", &["state"]).unwrap();

    // --- Counters ---
    /// Total RPCs processed since startup.
    pub static ref RPCS_PROCESSED_TOTAL: Counter =
        register_counter!("latticed_rpcs_processed_total", "Total number of RPCs processed.").unwrap();
    /// RPC failures by error code.
    pub static ref RPC_ERRORS_TOTAL: CounterVec =
        register_counter_vec!("latticed_rpc_errors_total", "RPC failures by error code.", &["code"]).unwrap();
    /// Background-agent iterations by agent name.
    pub static ref AGENT_ITERATIONS_TOTAL: CounterVec =
        register_counter_vec!("latticed_agent_iterations_total", "Agent loop iterations.", &["agent"]).unwrap();
    /// Credentials issued by context.
    pub static ref CREDS_ISSUED_TOTAL: CounterVec =
        register_counter_vec!("latticed_creds_issued_total", "Credentials issued by context.", &["context"]).unwrap();

    // --- Histograms ---
    /// Handler wall time by message type.
    pub static ref RPC_SECONDS: HistogramVec = register_histogram_vec!(
        "latticed_rpc_seconds",
        "Handler wall time in seconds, labeled by message type.",
        &["msg_type"]
    ).unwrap();
}

/// Renders the default registry in the Prometheus text exposition format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&prometheus::gather())
        .unwrap_or_default()
}
