// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the monitor controller.
//!
//! Uses `lazy_static` so metrics are registered exactly once for the process
//! lifetime, the same idiom the teacher project uses for its own metrics.

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Gauge, TextEncoder, register_counter, register_counter_vec, register_gauge};

lazy_static! {
    /// Number of worker processes (monitor + log) currently alive.
    pub static ref WORKERS_ALIVE: Gauge =
        register_gauge!("afd_mon_workers_alive", "Number of monitor/log worker processes currently alive.").unwrap();

    /// The `msa_id` of the currently published MSA region.
    pub static ref MSA_ID: Gauge =
        register_gauge!("afd_mon_msa_id", "Identifier of the currently published MSA region.").unwrap();

    /// Number of rows in the currently published MSA.
    pub static ref MSA_ROW_COUNT: Gauge =
        register_gauge!("afd_mon_msa_row_count", "Number of rows in the currently published MSA.").unwrap();

    /// Total worker restarts performed by the supervisor.
    pub static ref WORKER_RESTARTS_TOTAL: CounterVec =
        register_counter_vec!(
            "afd_mon_worker_restarts_total",
            "Total number of worker restarts, labeled by alias and worker kind.",
            &["alias", "kind"]
        ).unwrap();

    /// Total bytes received on remote log streams, labeled by alias.
    pub static ref LOG_BYTES_RECEIVED_TOTAL: CounterVec =
        register_counter_vec!(
            "afd_mon_log_bytes_received_total",
            "Total bytes received on remote log streams, labeled by alias.",
            &["alias"]
        ).unwrap();

    /// Total log-worker exits due to a missed packet sequence number.
    pub static ref MISSED_PACKET_TOTAL: Counter =
        register_counter!("afd_mon_missed_packet_total", "Total log-worker exits caused by a packet sequence gap.").unwrap();

    /// Total MSA rebuilds performed since process start.
    pub static ref MSA_REBUILDS_TOTAL: Counter =
        register_counter!("afd_mon_msa_rebuilds_total", "Total number of MSA rebuild operations performed.").unwrap();
}

/// Renders all registered metrics in Prometheus text exposition format.
pub fn render() -> String {
    let families = prometheus::gather();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}
