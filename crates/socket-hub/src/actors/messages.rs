//! Commands for the hub actor.
//!
//! Every membership change and every fan-out goes through [`HubMessage`];
//! a single task drains the queue, so commands never interleave.

use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::session::Session;
use crate::envelope::Envelope;
use crate::errors::HubError;

/// Messages sent to `HubActor`.
#[derive(Debug)]
pub enum HubMessage {
    /// Add a session to the member set.
    Register { session: Session },

    /// Remove a session from the member set.
    Unregister { session_id: Uuid },

    /// Enqueue an envelope on every member its filter accepts.
    Broadcast { envelope: Arc<Envelope> },

    /// Deliver a final envelope to every member, force-close them and
    /// stop accepting work.
    Shutdown {
        envelope: Arc<Envelope>,
        /// `Ok` for the shutdown that took effect, `InstanceClosed` for
        /// any that was queued behind it.
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },

    /// Snapshot taken in command order.
    GetStatus {
        respond_to: oneshot::Sender<HubStatus>,
    },
}

/// Status of the `HubActor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStatus {
    /// Current member count.
    pub member_count: usize,
    /// Whether shutdown has been processed.
    pub is_closed: bool,
    /// Commands handled so far, this one excluded.
    pub commands_processed: u64,
}
