//! Health endpoints for the chat server.
//!
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (is the hub accepting connections?)
//!
//! Readiness requires both the explicit ready flag, set once the listener
//! is bound, and an open hub. The body reports the current session count.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::actors::HubHandle;

/// Liveness and readiness for one hub.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    ready: AtomicBool,
    hub: HubHandle,
}

impl HealthState {
    /// Live, not yet ready.
    #[must_use]
    pub fn new(hub: HubHandle) -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            hub,
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark not ready, e.g. when shutdown begins.
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Ready flag set and hub not shut down.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && !self.hub.is_closed()
    }
}

/// Router serving `/health` and `/ready`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> (StatusCode, Json<Value>) {
    let ready = state.is_ready();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({ "ready": ready, "sessions": state.hub.len() })),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use crate::handler::NoopHandler;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    fn state() -> Arc<HealthState> {
        Arc::new(HealthState::new(HubHandle::spawn(Arc::new(NoopHandler))))
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("Failed to build request");
        app.oneshot(request)
            .await
            .expect("Failed to execute request")
            .status()
    }

    #[tokio::test]
    async fn test_ready_flag_toggles() {
        let state = state();
        assert!(state.is_live());
        assert!(!state.is_ready(), "Should not be ready by default");

        state.set_ready();
        assert!(state.is_ready());

        state.set_not_ready();
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_shut_down_hub_is_not_ready() {
        let hub = HubHandle::spawn(Arc::new(NoopHandler));
        let state = HealthState::new(hub.clone());
        state.set_ready();

        hub.shutdown(Envelope::close()).await.unwrap();
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_router_endpoints() {
        let state = state();
        let app = health_router(Arc::clone(&state));

        assert_eq!(get_status(app.clone(), "/health").await, StatusCode::OK);
        assert_eq!(
            get_status(app.clone(), "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.set_ready();
        assert_eq!(get_status(app.clone(), "/ready").await, StatusCode::OK);
        assert_eq!(get_status(app, "/unknown").await, StatusCode::NOT_FOUND);
    }
}
