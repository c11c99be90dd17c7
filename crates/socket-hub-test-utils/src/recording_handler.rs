//! Handler that records every callback.
//!
//! Clones share state, so a test keeps one clone for assertions and hands
//! the other to the `Manager`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use socket_hub::{HubError, Session, SessionHandler};
use tokio::sync::watch;
use uuid::Uuid;

use crate::WAIT_TIMEOUT;

/// One recorded callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerEvent {
    Connect(Uuid),
    Disconnect(Uuid),
    Message(Uuid, Bytes),
    MessageBinary(Uuid, Bytes),
    Sent(Uuid, Bytes),
    SentBinary(Uuid, Bytes),
    Error(Uuid, HubError),
    Close(Uuid, u16, String),
    Pong(Uuid),
}

impl HandlerEvent {
    pub fn session_id(&self) -> Uuid {
        match self {
            HandlerEvent::Connect(id)
            | HandlerEvent::Disconnect(id)
            | HandlerEvent::Message(id, _)
            | HandlerEvent::MessageBinary(id, _)
            | HandlerEvent::Sent(id, _)
            | HandlerEvent::SentBinary(id, _)
            | HandlerEvent::Error(id, _)
            | HandlerEvent::Close(id, _, _)
            | HandlerEvent::Pong(id) => *id,
        }
    }
}

/// [`SessionHandler`] that records events and connected sessions.
#[derive(Clone)]
pub struct RecordingHandler {
    inner: Arc<RecordingInner>,
}

struct RecordingInner {
    events: Mutex<Vec<HandlerEvent>>,
    sessions: Mutex<Vec<Session>>,
    reject_close: Mutex<Option<HubError>>,
    changed: watch::Sender<usize>,
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RecordingInner {
                events: Mutex::new(Vec::new()),
                sessions: Mutex::new(Vec::new()),
                reject_close: Mutex::new(None),
                changed: watch::channel(0).0,
            }),
        }
    }

    /// Make `on_close` return `error`.
    pub fn rejecting_close(self, error: HubError) -> Self {
        *self.inner.reject_close.lock().unwrap() = Some(error);
        self
    }

    fn record(&self, event: HandlerEvent) {
        self.inner.events.lock().unwrap().push(event);
        self.inner.changed.send_modify(|count| *count += 1);
    }

    pub fn events(&self) -> Vec<HandlerEvent> {
        self.inner.events.lock().unwrap().clone()
    }

    /// Sessions in connect order.
    pub fn sessions(&self) -> Vec<Session> {
        self.inner.sessions.lock().unwrap().clone()
    }

    pub fn events_for(&self, id: Uuid) -> Vec<HandlerEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.session_id() == id)
            .collect()
    }

    pub fn errors_for(&self, id: Uuid) -> Vec<HubError> {
        self.events_for(id)
            .into_iter()
            .filter_map(|event| match event {
                HandlerEvent::Error(_, error) => Some(error),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&HandlerEvent) -> bool) -> usize {
        self.inner.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    pub fn disconnects_for(&self, id: Uuid) -> usize {
        self.count(|event| *event == HandlerEvent::Disconnect(id))
    }

    /// Wait until `pred` holds over the recorded events.
    pub async fn wait_until(&self, what: &str, pred: impl Fn(&[HandlerEvent]) -> bool) {
        let mut rx = self.inner.changed.subscribe();
        let reached = tokio::time::timeout(WAIT_TIMEOUT, async {
            loop {
                if pred(&self.inner.events.lock().unwrap()) {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;
        assert!(
            reached.is_ok(),
            "timed out waiting for {what}; events: {:?}",
            self.events()
        );
    }

    /// Wait for `n` connects and return the sessions in connect order.
    pub async fn wait_for_connects(&self, n: usize) -> Vec<Session> {
        self.wait_until("connects", |events| {
            events
                .iter()
                .filter(|e| matches!(e, HandlerEvent::Connect(_)))
                .count()
                >= n
        })
        .await;
        self.sessions()
    }

    pub async fn wait_for_disconnects(&self, n: usize) {
        self.wait_until("disconnects", |events| {
            events
                .iter()
                .filter(|e| matches!(e, HandlerEvent::Disconnect(_)))
                .count()
                >= n
        })
        .await;
    }
}

#[async_trait]
impl SessionHandler for RecordingHandler {
    async fn on_connect(&self, session: &Session) {
        self.inner.sessions.lock().unwrap().push(session.clone());
        self.record(HandlerEvent::Connect(session.id()));
    }

    async fn on_disconnect(&self, session: &Session) {
        self.record(HandlerEvent::Disconnect(session.id()));
    }

    async fn on_message(&self, session: &Session, payload: Bytes) {
        self.record(HandlerEvent::Message(session.id(), payload));
    }

    async fn on_message_binary(&self, session: &Session, payload: Bytes) {
        self.record(HandlerEvent::MessageBinary(session.id(), payload));
    }

    async fn on_message_sent(&self, session: &Session, payload: &Bytes) {
        self.record(HandlerEvent::Sent(session.id(), payload.clone()));
    }

    async fn on_message_sent_binary(&self, session: &Session, payload: &Bytes) {
        self.record(HandlerEvent::SentBinary(session.id(), payload.clone()));
    }

    async fn on_error(&self, session: &Session, error: &HubError) {
        self.record(HandlerEvent::Error(session.id(), error.clone()));
    }

    async fn on_close(&self, session: &Session, code: u16, reason: &str) -> Result<(), HubError> {
        self.record(HandlerEvent::Close(session.id(), code, reason.to_string()));
        match self.inner.reject_close.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn on_pong(&self, session: &Session) {
        self.record(HandlerEvent::Pong(session.id()));
    }
}
