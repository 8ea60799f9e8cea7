// Metrics module for Prometheus observability

mod registry;

pub use registry::{
    gather_metrics, CREDENTIAL_ACQUISITIONS, REQUESTS_TOTAL, REQUEST_DURATION, TOKEN_EXPIRY,
    UPSTREAM_CALLS, VAULT_READS,
};

/// Helper to record request metrics
pub fn record_request(method: &str, endpoint: &str, status_code: u16, duration_secs: f64) {
    REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, &status_code.to_string()])
        .inc();

    REQUEST_DURATION
        .with_label_values(&[method, endpoint])
        .observe(duration_secs);
}

/// Helper to record how a credential was produced
pub fn record_acquisition(provider: &str, path: &str) {
    CREDENTIAL_ACQUISITIONS
        .with_label_values(&[provider, path])
        .inc();
}

pub fn record_vault_read(outcome: &str) {
    VAULT_READS.with_label_values(&[outcome]).inc();
}

/// Records seconds until expiry; tokens without a known expiry drop the series.
pub fn update_token_expiry(binding: &str, seconds: Option<i64>) {
    match seconds {
        Some(seconds) => TOKEN_EXPIRY.with_label_values(&[binding]).set(seconds as f64),
        None => {
            let _ = TOKEN_EXPIRY.remove_label_values(&[binding]);
        }
    }
}

pub fn record_upstream_call(service: &str, status_code: u16) {
    UPSTREAM_CALLS
        .with_label_values(&[service, &status_code.to_string()])
        .inc();
}
