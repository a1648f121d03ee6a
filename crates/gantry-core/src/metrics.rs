//! Prometheus metrics helpers for the Gantry system.
//!
//! Centralized metrics initialization and the metric names used across
//! components.
//!
//! # Usage
//!
//! ```rust,ignore
//! use gantry_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9090, handle).await.unwrap();
//!
//!     use metrics::counter;
//!     counter!("watch_events_polled_total").increment(1);
//! }
//! ```
//!
//! # Naming Conventions
//!
//! - Prefix: component (`watch_`, `harvest_`, `dedup_`)
//! - Suffix: unit or type (`_total`, `_depth`, `_seconds`)
//! - Labels sparingly, keyed by source or sink name only

use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// Must be called once at startup before any metrics are recorded. Returns
/// a handle for [`start_metrics_server`].
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already
/// installed instead of panicking. Useful in tests.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves `/metrics` on the given port. Spawns a background task and
/// returns immediately.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        axum::serve(listener, app).await.unwrap();
    });

    Ok(())
}

/// Register descriptions for the metrics used across Gantry.
///
/// Called automatically by [`init_metrics`].
fn register_common_metrics() {
    // =========================================================================
    // Watcher / dispatch metrics
    // =========================================================================

    describe_counter!(
        "watch_events_polled_total",
        "Events returned by source polls (label: source)"
    );
    describe_counter!(
        "watch_events_dispatched_total",
        "Events dispatched through the route table (label: source)"
    );
    describe_counter!(
        "watch_events_deduplicated_total",
        "NEW_MATCH events suppressed by the discovery dedup queue"
    );
    describe_counter!(
        "watch_handler_failures_total",
        "Per-item handler failures (label: handler)"
    );
    describe_counter!(
        "watch_dead_letters_total",
        "Events for which every routed handler failed"
    );
    describe_counter!(
        "watch_poll_errors_total",
        "Source poll cycles that returned an error (label: source)"
    );
    describe_gauge!(
        "watch_dispatch_queue_depth",
        "Events waiting in a source's dispatch channel (label: source)"
    );
    describe_gauge!(
        "watch_running",
        "Whether the watcher is running (1=yes, 0=no)"
    );

    // =========================================================================
    // Dedup queue metrics
    // =========================================================================

    describe_gauge!(
        "dedup_queue_depth",
        "Keys currently held by a discovery dedup queue (label: source)"
    );

    // =========================================================================
    // Harvester metrics
    // =========================================================================

    describe_counter!("harvest_cycles_total", "Completed harvest cycles");
    describe_counter!(
        "harvest_items_recent_total",
        "Items discovered in the recent window"
    );
    describe_counter!(
        "harvest_items_new_total",
        "Items in the recent-minus-indexed difference"
    );
    describe_counter!(
        "harvest_items_handled_total",
        "Worklist items successfully handled"
    );
    describe_counter!(
        "harvest_failures_total",
        "Worklist items whose handler failed"
    );
}

/// Increment a counter. Convenience wrapper around `metrics::counter!`.
#[inline]
pub fn increment(name: &'static str, count: u64) {
    metrics::counter!(name).increment(count);
}

/// Set a gauge value. Convenience wrapper around `metrics::gauge!`.
#[inline]
pub fn set_gauge(name: &'static str, value: f64) {
    metrics::gauge!(name).set(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn ensure_metrics_init() {
        INIT.call_once(|| {
            let _ = try_init_metrics();
        });
    }

    #[test]
    fn try_init_metrics_idempotent() {
        let handle1 = try_init_metrics();
        let handle2 = try_init_metrics();
        // At most one should succeed
        assert!(handle1.is_none() || handle2.is_none());
    }

    #[test]
    fn helpers_do_not_panic() {
        ensure_metrics_init();
        increment("test_counter", 0);
        increment("test_counter", 100);
        set_gauge("test_gauge", 0.0);
        set_gauge("test_gauge", -42.5);
    }

    #[test]
    fn register_common_metrics_is_idempotent() {
        ensure_metrics_init();
        register_common_metrics();
        register_common_metrics();
    }
}
