//! Actor model for the socket hub.
//!
//! # Hierarchy
//!
//! ```text
//! HubActor (one per Manager)
//! └── SessionActor (one per accepted transport)
//!     ├── reader path (runs on the accepting task)
//!     └── writer path (spawned; mailbox drain + heartbeat)
//! ```
//!
//! Handles (`HubHandle`, `Session`) are what the rest of the crate and the
//! application hold. Actors own the state and are only reachable through
//! their queues.

pub mod hub;
pub mod messages;
pub mod metrics;
pub mod session;

pub use hub::HubHandle;
pub use messages::{HubMessage, HubStatus};
pub use metrics::{MailboxLevel, MailboxMonitor};
pub use session::{Metadata, Session};
pub(crate) use session::SessionActor;
