// Prometheus metrics registry and collectors

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec_with_registry, register_gauge_vec_with_registry,
    register_histogram_vec_with_registry, CounterVec, Encoder, GaugeVec, HistogramVec, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // REQUEST METRICS
    // ============================================================================

    /// Total number of dashboard API requests
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec_with_registry!(
        Opts::new("requests_total", "Total number of dashboard API requests"),
        &["method", "endpoint", "status_code"],
        REGISTRY
    ).unwrap();

    /// Request duration histogram
    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec_with_registry!(
        prometheus::HistogramOpts::new("request_duration_seconds", "Request duration in seconds")
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "endpoint"],
        REGISTRY
    ).unwrap();

    // ============================================================================
    // CREDENTIAL METRICS
    // ============================================================================

    /// Credential acquisitions by the path that produced the token
    pub static ref CREDENTIAL_ACQUISITIONS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("credential_acquisitions_total", "Total credential acquisitions"),
        &["provider", "path"], // path: cache, vault, refresh, mint, failure
        REGISTRY
    ).unwrap();

    /// Vault read outcomes
    pub static ref VAULT_READS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("vault_reads_total", "Total vault reads"),
        &["outcome"], // outcome: found, absent, corrupt
        REGISTRY
    ).unwrap();

    /// Seconds until the cached token of a binding expires
    pub static ref TOKEN_EXPIRY: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("token_expiry_seconds", "Seconds until cached token expiry"),
        &["binding"],
        REGISTRY
    ).unwrap();

    // ============================================================================
    // UPSTREAM METRICS
    // ============================================================================

    /// Calls to Google Calendar and Microsoft Graph
    pub static ref UPSTREAM_CALLS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("upstream_calls_total", "Total upstream API calls"),
        &["service", "status_code"],
        REGISTRY
    ).unwrap();
}

/// Gather all metrics and return as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
