//! The transport collaborator.
//!
//! A [`Transport`] is an already-upgraded, already-framed duplex message
//! stream. The session reader and writer use it concurrently, so every
//! method takes `&self`; implementations split their read and write halves
//! internally.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::envelope::MessageKind;
use crate::errors::TransportError;

/// Duplex framed message stream owned by exactly one session.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Wait for the next inbound frame.
    ///
    /// Must be cancel-safe: the reader drops this future when the session is
    /// torn down from the other path.
    async fn read(&self) -> Result<(MessageKind, Bytes), TransportError>;

    /// Write one frame, giving up after `timeout`.
    async fn write(
        &self,
        kind: MessageKind,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<(), TransportError>;

    /// Close the stream. Idempotent; closing twice is a no-op.
    async fn close(&self);
}
