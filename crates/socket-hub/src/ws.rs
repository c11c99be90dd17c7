//! WebSocket transport over axum.
//!
//! [`WsTransport`] adapts an upgraded [`WebSocket`] to [`Transport`]. The
//! socket is split so the session reader and writer never contend: each
//! half sits behind its own async mutex.

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::envelope::{decode_close_payload, encode_close_payload, MessageKind};
use crate::errors::TransportError;
use crate::transport::Transport;

/// Apply the configured inbound size limit to an upgrade.
#[must_use]
pub fn upgrade(ws: WebSocketUpgrade, config: &Config) -> WebSocketUpgrade {
    ws.max_message_size(config.max_message_size)
        .max_frame_size(config.max_message_size)
}

/// [`Transport`] over an axum WebSocket.
pub struct WsTransport {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
    closed: AtomicBool,
}

impl WsTransport {
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
        }
    }
}

/// Map an outbound frame to an axum message.
fn to_message(kind: MessageKind, payload: Bytes) -> Result<Message, TransportError> {
    Ok(match kind {
        MessageKind::Text => Message::Text(
            String::from_utf8(payload.to_vec())
                .map_err(|e| TransportError::Write(format!("text payload is not UTF-8: {e}")))?,
        ),
        MessageKind::Binary => Message::Binary(payload.to_vec()),
        MessageKind::Ping => Message::Ping(payload.to_vec()),
        MessageKind::Pong => Message::Pong(payload.to_vec()),
        MessageKind::Close if payload.is_empty() => Message::Close(None),
        MessageKind::Close => {
            let (code, reason) = decode_close_payload(&payload);
            Message::Close(Some(CloseFrame {
                code,
                reason: Cow::Owned(reason),
            }))
        }
    })
}

/// Map an inbound axum message to a frame.
fn from_message(message: Message) -> (MessageKind, Bytes) {
    match message {
        Message::Text(text) => (MessageKind::Text, Bytes::from(text)),
        Message::Binary(data) => (MessageKind::Binary, Bytes::from(data)),
        Message::Ping(data) => (MessageKind::Ping, Bytes::from(data)),
        Message::Pong(data) => (MessageKind::Pong, Bytes::from(data)),
        Message::Close(frame) => (
            MessageKind::Close,
            frame.map_or_else(Bytes::new, |frame| {
                encode_close_payload(frame.code, &frame.reason)
            }),
        ),
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn read(&self) -> Result<(MessageKind, Bytes), TransportError> {
        let mut stream = self.stream.lock().await;
        match stream.next().await {
            Some(Ok(message)) => Ok(from_message(message)),
            Some(Err(e)) => Err(TransportError::Read(e.to_string())),
            None => Err(TransportError::Closed),
        }
    }

    async fn write(
        &self,
        kind: MessageKind,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let message = to_message(kind, payload)?;
        let mut sink = self.sink.lock().await;
        tokio::time::timeout(timeout, sink.send(message))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!(target: "socket_hub.ws", error = %e, "WebSocket close failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_close_frames_map_both_ways() {
        let message = to_message(MessageKind::Close, encode_close_payload(4001, "kicked")).unwrap();
        match &message {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, 4001);
                assert_eq!(frame.reason, "kicked");
            }
            other => unreachable!("unexpected message {other:?}"),
        }

        let (kind, payload) = from_message(message);
        assert_eq!(kind, MessageKind::Close);
        assert_eq!(decode_close_payload(&payload), (4001, "kicked".to_string()));

        assert!(matches!(
            to_message(MessageKind::Close, Bytes::new()).unwrap(),
            Message::Close(None)
        ));
        assert_eq!(
            from_message(Message::Close(None)),
            (MessageKind::Close, Bytes::new())
        );
    }

    #[test]
    fn test_invalid_utf8_text_is_a_write_error() {
        let result = to_message(MessageKind::Text, Bytes::from_static(&[0xff, 0xfe]));
        assert!(matches!(result, Err(TransportError::Write(_))));
    }

    #[test]
    fn test_data_frames_keep_their_kind() {
        assert_eq!(
            from_message(Message::Text("hi".to_string())),
            (MessageKind::Text, Bytes::from("hi"))
        );
        assert_eq!(
            from_message(Message::Binary(vec![1, 2])),
            (MessageKind::Binary, Bytes::from(vec![1u8, 2]))
        );
        assert_eq!(
            from_message(Message::Pong(Vec::new())).0,
            MessageKind::Pong
        );
    }
}
