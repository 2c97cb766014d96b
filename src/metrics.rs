//! Metrics and telemetry for range-vector evaluation
//!
//! This module provides Prometheus metrics for monitoring operator
//! throughput, window reuse, step latency and failures.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

lazy_static! {
    // === Operator Counters ===

    /// Evaluation steps completed
    pub static ref STEPS_TOTAL: CounterVec = register_counter_vec!(
        "rangevec_steps_total",
        "Evaluation steps completed by operators",
        &["operator"]
    ).unwrap();

    /// Series states built at operator initialization
    pub static ref SERIES_INITIALIZED_TOTAL: CounterVec = register_counter_vec!(
        "rangevec_series_initialized_total",
        "Series scan states created during operator initialization",
        &["operator"]
    ).unwrap();

    /// Points handed to window functions, by where they came from
    pub static ref POINTS_SELECTED_TOTAL: CounterVec = register_counter_vec!(
        "rangevec_points_selected_total",
        "Points selected into evaluation windows",
        &["source"]
    ).unwrap();

    /// Operator failures by error kind
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "rangevec_errors_total",
        "Operator errors by kind",
        &["kind", "operator"]
    ).unwrap();

    // === Latency Histograms ===

    /// Step evaluation duration
    pub static ref STEP_DURATION: HistogramVec = register_histogram_vec!(
        "rangevec_step_duration_seconds",
        "Step evaluation latency in seconds",
        &["operator"],
        vec![0.00001, 0.0001, 0.001, 0.01, 0.1, 1.0]
    ).unwrap();

    // === Resource Gauges ===

    /// Shards currently being evaluated
    pub static ref ACTIVE_SHARDS: Gauge = register_gauge!(
        "rangevec_active_shards",
        "Operator shards currently executing"
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

/// Record a completed step
#[inline]
pub fn record_step(operator: &str, duration_secs: f64) {
    STEPS_TOTAL.with_label_values(&[operator]).inc();
    STEP_DURATION
        .with_label_values(&[operator])
        .observe(duration_secs);
}

/// Record operator initialization
#[inline]
pub fn record_series_initialized(operator: &str, count: usize) {
    SERIES_INITIALIZED_TOTAL
        .with_label_values(&[operator])
        .inc_by(count as f64);
}

/// Record window selection: points carried over versus read from storage
#[inline]
pub fn record_points_selected(reused: usize, scanned: usize) {
    if reused > 0 {
        POINTS_SELECTED_TOTAL
            .with_label_values(&["reused"])
            .inc_by(reused as f64);
    }
    if scanned > 0 {
        POINTS_SELECTED_TOTAL
            .with_label_values(&["scanned"])
            .inc_by(scanned as f64);
    }
}

/// Record an operator error
#[inline]
pub fn record_error(kind: &str, operator: &str) {
    ERRORS_TOTAL.with_label_values(&[kind, operator]).inc();
}
