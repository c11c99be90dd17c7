//! Socket Hub Library
//!
//! A connection registry and message fan-out engine for persistent,
//! bidirectional message streams such as WebSockets.
//!
//! - Adopts already-upgraded transports as sessions
//! - Broadcasts to all sessions, a filtered subset, or everyone but one
//! - Sends directly to a single session or a list of them
//! - Keeps idle connections alive with periodic heartbeats
//! - Reports connection lifecycle to a pluggable [`SessionHandler`]
//!
//! # Architecture
//!
//! ```text
//! Manager (façade, one per application)
//! └── HubActor (owns the member set; serialized command loop)
//!     └── SessionActor (one per transport)
//!         ├── reader: transport -> handler
//!         └── writer: mailbox -> transport, heartbeat
//! ```
//!
//! # Key Design Decisions
//!
//! - **Bounded mailboxes**: broadcasts never block; a full mailbox drops
//!   the envelope for that session only and reports `BufferFull`
//! - **Serialized registry**: membership and fan-out share one queue, so a
//!   broadcast sees a consistent member set
//! - **Exactly-once teardown**: the first failing path closes the session;
//!   `on_disconnect` fires once, after the transport is closed
//!
//! # Modules
//!
//! - [`actors`] - Hub and session actors
//! - [`config`] - Configuration from environment
//! - [`envelope`] - Message kinds and envelopes
//! - [`errors`] - Error types
//! - [`handler`] - Application callbacks
//! - [`manager`] - Public façade
//! - [`transport`] - Transport abstraction
//! - [`ws`] - WebSocket transport over axum

pub mod actors;
pub mod config;
pub mod envelope;
pub mod errors;
pub mod handler;
pub mod manager;
pub mod observability;
pub mod transport;
pub mod ws;

pub use actors::{HubHandle, HubStatus, Metadata, Session};
pub use config::Config;
pub use envelope::{Envelope, MessageKind};
pub use errors::{HubError, TransportError};
pub use handler::{Callbacks, NoopHandler, SessionHandler};
pub use manager::Manager;
pub use transport::Transport;
