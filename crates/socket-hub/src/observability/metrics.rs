//! Metrics definitions for the socket hub.
//!
//! All metrics follow Prometheus naming conventions:
//! - `hub_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `kind`: message kinds (text, binary, close, ping, pong)
//! - `reason`: drop reasons, from `HubError::kind_label`
//! - `cause`: session close causes (5 values)
//!
//! Session ids are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to
/// render `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Transport writes are bounded by the write wait (10s default)
        .set_buckets_for_metric(
            Matcher::Prefix("hub_write_duration".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.000, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set write duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Membership (Gauges)
// ============================================================================

/// Set the number of registered sessions.
///
/// Metric: `hub_sessions_active`
/// Labels: none
///
/// Written by the hub loop after every membership change.
pub fn set_sessions_active(count: usize) {
    // usize to f64 conversion is safe for realistic session counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("hub_sessions_active").set(count as f64);
}

// ============================================================================
// Fan-out (Counters)
// ============================================================================

/// Record one broadcast processed by the hub loop.
///
/// Metric: `hub_broadcasts_total`
/// Labels: `kind`
pub fn record_broadcast(kind: &'static str) {
    counter!("hub_broadcasts_total", "kind" => kind).increment(1);
}

/// Record an envelope that never reached a session mailbox.
///
/// Metric: `hub_messages_dropped_total`
/// Labels: `reason` (`HubError::kind_label`)
pub fn record_message_dropped(reason: &'static str) {
    counter!("hub_messages_dropped_total", "reason" => reason).increment(1);
}

// ============================================================================
// Session lifecycle
// ============================================================================

/// Record a session teardown.
///
/// Metric: `hub_session_closed_total`
/// Labels: `cause`
pub fn record_session_closed(cause: &'static str) {
    counter!("hub_session_closed_total", "cause" => cause).increment(1);
}

/// Record a heartbeat probe that could not be written.
///
/// Metric: `hub_heartbeat_failures_total`
/// Labels: none
pub fn record_heartbeat_failure() {
    counter!("hub_heartbeat_failures_total").increment(1);
}

/// Record the time spent writing one frame to a transport.
///
/// Metric: `hub_write_duration_seconds`
/// Labels: `kind`
pub fn record_write_duration(kind: &'static str, duration: Duration) {
    histogram!("hub_write_duration_seconds", "kind" => kind).record(duration.as_secs_f64());
}
