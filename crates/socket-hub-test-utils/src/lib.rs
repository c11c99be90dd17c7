//! # Socket Hub Test Utilities
//!
//! Mocks for exercising the hub without real sockets.
//!
//! ## Modules
//!
//! - `mock_transport` - Scripted in-memory transport with write recording
//!   and failure injection
//! - `recording_handler` - Handler that records every callback and can
//!   wait for events
//!
//! ## Usage
//!
//! ```rust,ignore
//! use socket_hub::{Manager, Metadata};
//! use socket_hub_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let handler = RecordingHandler::new();
//!     let manager = Arc::new(Manager::new(handler.clone()));
//!
//!     let transport = MockTransport::new();
//!     tokio::spawn({
//!         let manager = Arc::clone(&manager);
//!         let transport = transport.clone();
//!         async move { manager.accept(transport, Metadata::new()).await }
//!     });
//!
//!     handler.wait_for_connects(1).await;
//!     manager.broadcast_text("hello").unwrap();
//!     transport.wait_for_writes(1).await;
//! }
//! ```

use std::time::Duration;

pub mod mock_transport;
pub mod recording_handler;

pub use mock_transport::{Frame, MockTransport};
pub use recording_handler::{HandlerEvent, RecordingHandler};

/// Upper bound for every `wait_*` helper.
///
/// Under paused time this is virtual time, so heartbeat tests must use
/// intervals well below it.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
