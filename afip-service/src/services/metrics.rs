//! Prometheus metrics for afip-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// SOAP call counter by service, operation and status.
pub static SOAP_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "afip_soap_requests_total",
        "Total number of SOAP requests sent to AFIP",
        &["service", "operation", "status"]
    )
    .expect("Failed to register soap_requests_total")
});

/// SOAP call duration histogram by service and operation.
pub static SOAP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "afip_soap_request_duration_seconds",
        "SOAP request duration in seconds",
        &["service", "operation"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to register soap_request_duration")
});

/// WSAA logins by target service and outcome.
pub static LOGINS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "afip_logins_total",
        "Total number of WSAA login attempts",
        &["service", "outcome"] // issued, already_valid, failed
    )
    .expect("Failed to register logins_total")
});

/// Voucher authorizations by voucher type and outcome.
pub static AUTHORIZATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "afip_authorizations_total",
        "Total number of voucher authorization results",
        &["voucher_type", "outcome"]
    )
    .expect("Failed to register authorizations_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "afip_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&SOAP_REQUESTS_TOTAL);
    Lazy::force(&SOAP_REQUEST_DURATION);
    Lazy::force(&LOGINS_TOTAL);
    Lazy::force(&AUTHORIZATIONS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
}

pub fn record_error(error: &crate::error::AfipError) {
    ERRORS_TOTAL.with_label_values(&[error.kind()]).inc();
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
