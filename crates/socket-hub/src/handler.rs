//! Application callbacks.
//!
//! The application implements [`SessionHandler`] once and hands it to the
//! [`Manager`](crate::manager::Manager) at construction. Every method has a
//! no-op default, so implementors override only what they need.
//!
//! For closure-style wiring, [`Callbacks`] implements the trait on top of
//! nine slots; each `handle_*` setter replaces its slot (last one wins).

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

use crate::actors::Session;
use crate::errors::HubError;

/// Callbacks invoked by sessions and the hub.
///
/// Message callbacks run on the session's reader path: a slow handler
/// stalls that session's inbound stream only. `on_error` for broadcast
/// failures runs on its own task and may call back into the hub.
#[async_trait]
pub trait SessionHandler: Send + Sync + 'static {
    /// A session was registered and its writer is running.
    async fn on_connect(&self, _session: &Session) {}

    /// A session finished teardown. Fires exactly once per session.
    async fn on_disconnect(&self, _session: &Session) {}

    /// Inbound text message.
    async fn on_message(&self, _session: &Session, _payload: Bytes) {}

    /// Inbound binary message.
    async fn on_message_binary(&self, _session: &Session, _payload: Bytes) {}

    /// A text message was written to the transport.
    async fn on_message_sent(&self, _session: &Session, _payload: &Bytes) {}

    /// A binary message was written to the transport.
    async fn on_message_sent_binary(&self, _session: &Session, _payload: &Bytes) {}

    /// Backpressure, transport failure or a rejected close.
    async fn on_error(&self, _session: &Session, _error: &HubError) {}

    /// The peer sent a close frame. Returning `Err` reports it via
    /// `on_error` before the reader stops.
    async fn on_close(&self, _session: &Session, _code: u16, _reason: &str) -> Result<(), HubError> {
        Ok(())
    }

    /// The peer answered a heartbeat.
    async fn on_pong(&self, _session: &Session) {}
}

/// Handler that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl SessionHandler for NoopHandler {}

type MessageFn = Arc<dyn Fn(&Session, Bytes) + Send + Sync>;
type SentFn = Arc<dyn Fn(&Session, &Bytes) + Send + Sync>;
type SessionFn = Arc<dyn Fn(&Session) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&Session, &HubError) + Send + Sync>;
type CloseFn = Arc<dyn Fn(&Session, u16, &str) -> Result<(), HubError> + Send + Sync>;

/// Closure-slot implementation of [`SessionHandler`].
///
/// ```rust,ignore
/// let callbacks = Callbacks::new()
///     .handle_message(|session, payload| {
///         let _ = session.hub().broadcast_text(payload);
///     })
///     .handle_disconnect(|session| tracing::info!(id = %session.id(), "gone"));
/// ```
#[derive(Clone, Default)]
pub struct Callbacks {
    message: Option<MessageFn>,
    message_binary: Option<MessageFn>,
    message_sent: Option<SentFn>,
    message_sent_binary: Option<SentFn>,
    error: Option<ErrorFn>,
    close: Option<CloseFn>,
    connect: Option<SessionFn>,
    disconnect: Option<SessionFn>,
    pong: Option<SessionFn>,
}

impl Callbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn handle_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, Bytes) + Send + Sync + 'static,
    {
        self.message = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn handle_message_binary<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, Bytes) + Send + Sync + 'static,
    {
        self.message_binary = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn handle_sent_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &Bytes) + Send + Sync + 'static,
    {
        self.message_sent = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn handle_sent_message_binary<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &Bytes) + Send + Sync + 'static,
    {
        self.message_sent_binary = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn handle_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &HubError) + Send + Sync + 'static,
    {
        self.error = Some(Arc::new(f));
        self
    }

    /// Override close negotiation.
    #[must_use]
    pub fn handle_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, u16, &str) -> Result<(), HubError> + Send + Sync + 'static,
    {
        self.close = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn handle_connect<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.connect = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn handle_disconnect<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.disconnect = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn handle_pong<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.pong = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("message", &self.message.is_some())
            .field("message_binary", &self.message_binary.is_some())
            .field("message_sent", &self.message_sent.is_some())
            .field("message_sent_binary", &self.message_sent_binary.is_some())
            .field("error", &self.error.is_some())
            .field("close", &self.close.is_some())
            .field("connect", &self.connect.is_some())
            .field("disconnect", &self.disconnect.is_some())
            .field("pong", &self.pong.is_some())
            .finish()
    }
}

#[async_trait]
impl SessionHandler for Callbacks {
    async fn on_connect(&self, session: &Session) {
        if let Some(f) = &self.connect {
            f(session);
        }
    }

    async fn on_disconnect(&self, session: &Session) {
        if let Some(f) = &self.disconnect {
            f(session);
        }
    }

    async fn on_message(&self, session: &Session, payload: Bytes) {
        if let Some(f) = &self.message {
            f(session, payload);
        }
    }

    async fn on_message_binary(&self, session: &Session, payload: Bytes) {
        if let Some(f) = &self.message_binary {
            f(session, payload);
        }
    }

    async fn on_message_sent(&self, session: &Session, payload: &Bytes) {
        if let Some(f) = &self.message_sent {
            f(session, payload);
        }
    }

    async fn on_message_sent_binary(&self, session: &Session, payload: &Bytes) {
        if let Some(f) = &self.message_sent_binary {
            f(session, payload);
        }
    }

    async fn on_error(&self, session: &Session, error: &HubError) {
        if let Some(f) = &self.error {
            f(session, error);
        }
    }

    async fn on_close(&self, session: &Session, code: u16, reason: &str) -> Result<(), HubError> {
        match &self.close {
            Some(f) => f(session, code, reason),
            None => Ok(()),
        }
    }

    async fn on_pong(&self, session: &Session) {
        if let Some(f) = &self.pong {
            f(session);
        }
    }
}
