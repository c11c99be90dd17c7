//! Observability for the socket hub.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Message payloads are never logged; only kinds and lengths.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `hub_sessions_active` | Gauge | none | Registered sessions |
//! | `hub_broadcasts_total` | Counter | `kind` | Broadcasts processed by the hub loop |
//! | `hub_messages_dropped_total` | Counter | `reason` | Envelopes that never reached a mailbox |
//! | `hub_session_closed_total` | Counter | `cause` | Session teardowns |
//! | `hub_heartbeat_failures_total` | Counter | none | Heartbeat writes that failed |
//! | `hub_write_duration_seconds` | Histogram | `kind` | Transport write latency |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
