//! Envelopes: the unit of transfer between the manager, the hub and sessions.
//!
//! An [`Envelope`] carries a [`MessageKind`], a payload and an optional
//! delivery filter. It is immutable once built and travels through mailboxes
//! behind an `Arc`, so kind and payload always move together.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;

use crate::actors::Session;

/// Close status used when a close frame carries no code.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Normal closure status.
pub const CLOSE_NORMAL: u16 = 1000;

/// Frame kinds understood by the hub and its transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// UTF-8 text payload.
    Text,
    /// Opaque binary payload.
    Binary,
    /// Close handshake; payload is empty or `code (u16 BE) ++ reason`.
    Close,
    /// Heartbeat probe written by the session writer.
    Ping,
    /// Heartbeat acknowledgment from the peer.
    Pong,
}

impl MessageKind {
    /// Returns the kind as a string for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Binary => "binary",
            MessageKind::Close => "close",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
        }
    }
}

/// Delivery predicate evaluated per session during a broadcast.
pub type Filter = Arc<dyn Fn(&Session) -> bool + Send + Sync>;

/// An immutable message bound for one or more sessions.
#[derive(Clone)]
pub struct Envelope {
    kind: MessageKind,
    payload: Bytes,
    filter: Option<Filter>,
}

impl Envelope {
    /// Build an envelope of the given kind with no filter.
    #[must_use]
    pub fn new(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            filter: None,
        }
    }

    /// Text envelope.
    #[must_use]
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Text, payload)
    }

    /// Binary envelope.
    #[must_use]
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Binary, payload)
    }

    /// Close envelope with an empty payload.
    #[must_use]
    pub fn close() -> Self {
        Self::new(MessageKind::Close, Bytes::new())
    }

    /// Close envelope carrying a status code and reason.
    #[must_use]
    pub fn close_with(code: u16, reason: &str) -> Self {
        Self::new(MessageKind::Close, encode_close_payload(code, reason))
    }

    /// Zero-length heartbeat probe.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(MessageKind::Ping, Bytes::new())
    }

    /// Attach a delivery filter. Only consulted by broadcasts.
    #[must_use]
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Session) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[must_use]
    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    /// Whether a broadcast of this envelope should reach `session`.
    ///
    /// Envelopes without a filter accept every session.
    #[must_use]
    pub fn accepts(&self, session: &Session) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(session))
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("kind", &self.kind)
            .field("payload_len", &self.payload.len())
            .field("filtered", &self.has_filter())
            .finish()
    }
}

/// Encode a close payload: big-endian status code followed by the reason.
#[must_use]
pub fn encode_close_payload(code: u16, reason: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + reason.len());
    buf.put_u16(code);
    buf.put_slice(reason.as_bytes());
    buf.freeze()
}

/// Decode a close payload into `(code, reason)`.
///
/// Payloads shorter than two bytes carry no status and map to
/// [`CLOSE_NO_STATUS`] with an empty reason.
#[must_use]
pub fn decode_close_payload(payload: &[u8]) -> (u16, String) {
    match payload {
        [hi, lo, reason @ ..] => (
            u16::from_be_bytes([*hi, *lo]),
            String::from_utf8_lossy(reason).into_owned(),
        ),
        _ => (CLOSE_NO_STATUS, String::new()),
    }
}
