//! Metrics and telemetry
//!
//! Prometheus metrics for query throughput, latency, data volume and the
//! last-update write path.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, register_int_counter, CounterVec, Encoder,
    Histogram, IntCounter, TextEncoder,
};

lazy_static! {
    // === Query Counters ===

    /// Total measurement queries by outcome
    pub static ref QUERIES_TOTAL: CounterVec = register_counter_vec!(
        "tsdb_queries_total",
        "Total measurement queries",
        &["status"]
    ).unwrap();

    /// Raw samples consumed by queries
    pub static ref SAMPLES_READ: IntCounter = register_int_counter!(
        "tsdb_samples_read_total",
        "Raw samples consumed by measurement queries"
    ).unwrap();

    /// Result rows produced by queries
    pub static ref ROWS_PRODUCED: IntCounter = register_int_counter!(
        "tsdb_rows_produced_total",
        "Result rows produced by measurement queries"
    ).unwrap();

    // === Latency Histograms ===

    /// End-to-end query duration
    pub static ref QUERY_DURATION: Histogram = register_histogram!(
        "tsdb_query_duration_seconds",
        "Measurement query latency in seconds",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    // === Writes ===

    /// Last-update markers written
    pub static ref LAST_UPDATE_WRITES: IntCounter = register_int_counter!(
        "tsdb_last_update_writes_total",
        "Last-update markers written"
    ).unwrap();

    // === Error Counters ===

    /// Total errors by type
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "tsdb_errors_total",
        "Total errors by type and operation",
        &["error_type", "operation"]
    ).unwrap();
}

/// Get metrics in Prometheus text format
///
/// # Returns
///
/// Result containing the formatted metrics string, or an error if encoding fails
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record a finished measurement query
#[inline]
pub fn record_query(duration_secs: f64, samples: usize, rows: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    QUERIES_TOTAL.with_label_values(&[status]).inc();
    QUERY_DURATION.observe(duration_secs);
    SAMPLES_READ.inc_by(samples as u64);
    ROWS_PRODUCED.inc_by(rows as u64);
}

/// Record an error
#[inline]
pub fn record_error(error_type: &str, operation: &str) {
    ERRORS_TOTAL
        .with_label_values(&[error_type, operation])
        .inc();
}
