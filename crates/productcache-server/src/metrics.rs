//! Prometheus metrics for the product cache service.
//!
//! This module provides:
//! - HTTP request metrics (count, latency)
//! - Cache metrics (hits, misses by reason, failed writes, connection state)
//! - Backing store metrics (fetches issued, waiters coalesced onto them)
//!
//! Recording goes through the `metrics` facade and is a no-op until
//! [`init_metrics`] installs the Prometheus recorder.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

use crate::cache::ConnectionState;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

    // Cache metrics
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_WRITE_FAILURES_TOTAL: &str = "cache_write_failures_total";
    pub const CACHE_CONNECTION_STATE: &str = "cache_connection_state";

    // Backing store metrics
    pub const BACKING_STORE_FETCHES_TOTAL: &str = "backing_store_fetches_total";
    pub const COALESCED_WAITERS_TOTAL: &str = "coalesced_waiters_total";
}

/// Initialize the Prometheus metrics exporter.
///
/// This should be called once at server startup.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    // Pull-based: /metrics is served by our own router
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

// =============================================================================
// HTTP Metrics
// =============================================================================

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let status_class = match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    };

    let normalized_path = normalize_path(path);

    counter!(
        names::HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "path" => normalized_path.clone(),
        "status" => status.to_string(),
        "status_class" => status_class
    )
    .increment(1);

    histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "path" => normalized_path
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Cache Metrics
// =============================================================================

pub fn record_cache_hit() {
    counter!(names::CACHE_HITS_TOTAL).increment(1);
}

/// Record a cache miss. `reason` is one of `absent`, `unavailable`, `error`, `malformed`, `stale`.
pub fn record_cache_miss(reason: &'static str) {
    counter!(names::CACHE_MISSES_TOTAL, "reason" => reason).increment(1);
}

/// Record a cache SET or DEL that did not go through.
pub fn record_cache_write_failure() {
    counter!(names::CACHE_WRITE_FAILURES_TOTAL).increment(1);
}

pub fn set_cache_connection_state(mode: &'static str, state: ConnectionState) {
    gauge!(names::CACHE_CONNECTION_STATE, "mode" => mode).set(state.as_gauge());
}

// =============================================================================
// Backing Store Metrics
// =============================================================================

/// Record a backing-store fetch actually issued (one per coalesced group).
pub fn record_backing_fetch() {
    counter!(names::BACKING_STORE_FETCHES_TOTAL).increment(1);
}

/// Record a reader that joined an in-flight fetch instead of issuing one.
pub fn record_coalesced_waiter() {
    counter!(names::COALESCED_WAITERS_TOTAL).increment(1);
}

// =============================================================================
// Helpers
// =============================================================================

/// Normalize a path to reduce cardinality.
///
/// `/api/products/42` -> `/api/products/{id}`
fn normalize_path(path: &str) -> String {
    let mut normalized = Vec::new();
    let mut prev = "";

    for part in path.split('/') {
        if prev == "products" && !part.is_empty() {
            normalized.push("{id}");
        } else {
            normalized.push(part);
        }
        prev = part;
    }

    normalized.join("/")
}
