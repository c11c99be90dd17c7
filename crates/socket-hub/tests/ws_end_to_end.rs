//! End-to-end tests using a real WebSocket client against an axum server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use common::wait_for_members;
use futures::{SinkExt, StreamExt};
use socket_hub::ws::{self, WsTransport};
use socket_hub::{Callbacks, Manager, Metadata};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn ws_route(ws: WebSocketUpgrade, State(manager): State<Arc<Manager>>) -> impl IntoResponse {
    ws::upgrade(ws, manager.config()).on_upgrade(move |socket| async move {
        let _ = manager.accept(WsTransport::new(socket), Metadata::new()).await;
    })
}

/// Boot a chat server and return its WS URL and manager.
async fn boot_server() -> (String, Arc<Manager>) {
    let manager = Arc::new(Manager::new(Callbacks::new().handle_message(
        |session, payload| {
            let _ = session.hub().broadcast_text(payload);
        },
    )));

    let app = Router::new()
        .route("/ws", get(ws_route))
        .with_state(Arc::clone(&manager));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{addr}/ws"), manager)
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

/// Next data or close frame, skipping heartbeats.
async fn next_frame(ws: &mut WsStream) -> Option<Message> {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")?;
        match msg {
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Ok(message) => return Some(message),
            Err(_) => return None,
        }
    }
}

#[tokio::test]
async fn test_chat_message_reaches_every_client() {
    let (url, manager) = boot_server().await;
    let mut alice = connect(&url).await;
    let mut bob = connect(&url).await;
    wait_for_members(&manager, 2).await;

    alice.send(Message::Text("hi".to_string())).await.unwrap();

    for client in [&mut alice, &mut bob] {
        match next_frame(client).await {
            Some(Message::Text(text)) => assert_eq!(text, "hi"),
            other => unreachable!("expected text, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_client_disconnect_unregisters() {
    let (url, manager) = boot_server().await;
    let mut alice = connect(&url).await;
    let _bob = connect(&url).await;
    wait_for_members(&manager, 2).await;

    alice.close(None).await.unwrap();
    wait_for_members(&manager, 1).await;
}

#[tokio::test]
async fn test_shutdown_sends_close_to_clients() {
    let (url, manager) = boot_server().await;
    let mut alice = connect(&url).await;
    wait_for_members(&manager, 1).await;

    manager.shutdown().await.unwrap();

    match next_frame(&mut alice).await {
        Some(Message::Close(_)) | None => {}
        other => unreachable!("expected close, got {other:?}"),
    }
    assert!(manager.is_closed());
}
