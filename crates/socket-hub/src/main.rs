//! Socket Hub chat server
//!
//! Minimal chat room on top of the hub: every text message a client sends
//! is broadcast to every connected client.
//!
//! # Endpoints
//!
//! - `GET /ws?name=<name>` - WebSocket upgrade
//! - `GET /health`, `GET /ready` - probes
//! - `GET /metrics` - Prometheus metrics
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Create the `Manager` with the chat handler
//! 4. Serve HTTP until Ctrl+C or SIGTERM
//! 5. Shut the hub down, closing every session

#![warn(clippy::pedantic)]

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use metrics_exporter_prometheus::PrometheusHandle;
use socket_hub::observability::{health_router, init_metrics_recorder, HealthState};
use socket_hub::ws::{self, WsTransport};
use socket_hub::{Config, HubError, Manager, Metadata, Session, SessionHandler};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Broadcasts every inbound text message to the whole room.
struct ChatHandler;

#[async_trait]
impl SessionHandler for ChatHandler {
    async fn on_connect(&self, session: &Session) {
        info!(session_id = %session.id(), name = ?session.get("name"), "Client joined");
    }

    async fn on_disconnect(&self, session: &Session) {
        info!(session_id = %session.id(), "Client left");
    }

    async fn on_message(&self, session: &Session, payload: Bytes) {
        debug!(session_id = %session.id(), len = payload.len(), "Chat message");
        if let Err(e) = session.hub().broadcast_text(payload) {
            debug!(error = %e, "Broadcast refused");
        }
    }

    async fn on_error(&self, session: &Session, error: &HubError) {
        warn!(session_id = %session.id(), error = %error, "Session error");
    }
}

#[derive(Clone)]
struct AppState {
    manager: Arc<Manager>,
    prometheus: PrometheusHandle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "socket_hub=debug,socket_hub_chat=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Socket Hub chat server");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        mailbox_capacity = config.mailbox_capacity,
        max_message_size = config.max_message_size,
        write_wait_ms = config.write_wait.as_millis(),
        heartbeat_interval_ms = config.heartbeat_interval.as_millis(),
        "Configuration loaded successfully"
    );

    let prometheus = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        anyhow::anyhow!(e)
    })?;

    let bind_address = config.bind_address.clone();
    let manager = Arc::new(Manager::with_config(config, ChatHandler)?);
    let health_state = Arc::new(HealthState::new(manager.hub().clone()));

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(AppState {
            manager: Arc::clone(&manager),
            prometheus,
        })
        .merge(health_router(Arc::clone(&health_state)))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    info!(addr = %bind_address, "Listening");
    health_state.set_ready();

    let shutdown_manager = Arc::clone(&manager);
    let shutdown_health = Arc::clone(&health_state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, closing sessions...");
            shutdown_health.set_not_ready();
            if let Err(e) = shutdown_manager.shutdown().await {
                warn!(error = %e, "Hub shutdown error");
            }
        })
        .await
        .context("server error")?;

    info!("Socket Hub chat server shutdown complete");
    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let manager = state.manager;
    let mut metadata = Metadata::new();
    if let Some(name) = params.get("name") {
        metadata.insert("name".to_string(), serde_json::Value::from(name.as_str()));
    }

    ws::upgrade(ws, manager.config()).on_upgrade(move |socket| async move {
        if let Err(e) = manager.accept(WsTransport::new(socket), metadata).await {
            debug!(error = %e, "Connection not accepted");
        }
    })
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    state.prometheus.render()
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
