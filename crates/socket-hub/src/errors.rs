//! Socket hub error types.
//!
//! `BufferFull` and transport failures raised on a session's own paths are
//! reported through [`SessionHandler::on_error`](crate::handler::SessionHandler::on_error);
//! `Closed` and `InstanceClosed` are returned synchronously to the caller of
//! the failing operation.

use std::time::Duration;
use thiserror::Error;

/// Socket hub error type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HubError {
    /// Operation attempted on a torn-down session.
    #[error("session is closed")]
    Closed,

    /// The session mailbox is at capacity (backpressure, non-fatal).
    #[error("session mailbox is full")]
    BufferFull,

    /// Read or write on the underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Manager-level operation attempted after shutdown.
    #[error("hub instance is closed")]
    InstanceClosed,

    /// The close handler refused the peer's close frame.
    #[error("close rejected: {0}")]
    CloseRejected(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failures surfaced by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Reading the next frame failed.
    #[error("read failed: {0}")]
    Read(String),

    /// Writing a frame failed.
    #[error("write failed: {0}")]
    Write(String),

    /// A write did not complete within the write wait.
    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    /// The stream has ended or was already closed.
    #[error("transport closed")]
    Closed,
}

impl HubError {
    /// Returns true if the error terminates the session it was raised on.
    ///
    /// `BufferFull` only loses the single envelope that did not fit.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            HubError::BufferFull | HubError::Config(_) => false,
            HubError::Closed
            | HubError::Transport(_)
            | HubError::InstanceClosed
            | HubError::CloseRejected(_) => true,
        }
    }

    /// Bounded label for metrics and structured logs.
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            HubError::Closed => "closed",
            HubError::BufferFull => "buffer_full",
            HubError::Transport(TransportError::Timeout(_)) => "transport_timeout",
            HubError::Transport(_) => "transport",
            HubError::InstanceClosed => "instance_closed",
            HubError::CloseRejected(_) => "close_rejected",
            HubError::Config(_) => "config",
        }
    }
}

impl From<crate::config::ConfigError> for HubError {
    fn from(err: crate::config::ConfigError) -> Self {
        HubError::Config(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ConfigError;

    #[test]
    fn test_fatality() {
        assert!(!HubError::BufferFull.is_fatal());
        assert!(HubError::Closed.is_fatal());
        assert!(HubError::InstanceClosed.is_fatal());
        assert!(HubError::Transport(TransportError::Closed).is_fatal());
        assert!(HubError::CloseRejected("nope".to_string()).is_fatal());
    }

    #[test]
    fn test_kind_labels_are_bounded() {
        assert_eq!(HubError::BufferFull.kind_label(), "buffer_full");
        assert_eq!(HubError::Closed.kind_label(), "closed");
        assert_eq!(
            HubError::Transport(TransportError::Timeout(Duration::from_secs(1))).kind_label(),
            "transport_timeout"
        );
        assert_eq!(
            HubError::Transport(TransportError::Read("eof".to_string())).kind_label(),
            "transport"
        );
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: HubError = TransportError::Write("broken pipe".to_string()).into();
        assert!(matches!(err, HubError::Transport(TransportError::Write(_))));
    }

    #[test]
    fn test_config_error_conversion() {
        let err: HubError = ConfigError::InvalidValue("bad".to_string()).into();
        assert!(matches!(err, HubError::Config(_)));
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(format!("{}", HubError::Closed), "session is closed");
        assert_eq!(format!("{}", HubError::BufferFull), "session mailbox is full");
        assert_eq!(
            format!("{}", HubError::InstanceClosed),
            "hub instance is closed"
        );
        assert_eq!(
            format!(
                "{}",
                HubError::Transport(TransportError::Read("reset".to_string()))
            ),
            "transport error: read failed: reset"
        );
    }
}
