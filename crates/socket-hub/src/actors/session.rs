//! `SessionActor` - per-connection actor.
//!
//! Each session owns exactly one [`Transport`] and runs two paths:
//! - the reader, which dispatches inbound frames to the [`SessionHandler`]
//! - the writer, which drains the bounded mailbox and sends heartbeats
//!
//! # Lifecycle
//!
//! 1. Created by the manager for an accepted transport and registered
//! 2. Writer spawned, `on_connect` fired, reader runs on the calling task
//! 3. Whichever path fails first tears the session down; the other path
//!    observes the cancelled token and exits
//! 4. The transport is closed once both paths have finished
//!
//! The [`Session`] handle is what the hub and the application hold. It is
//! cheap to clone and compares by id.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use super::hub::HubHandle;
use super::metrics::MailboxMonitor;
use crate::config::Config;
use crate::envelope::{decode_close_payload, Envelope, MessageKind};
use crate::errors::{HubError, TransportError};
use crate::handler::SessionHandler;
use crate::observability::metrics;
use crate::transport::Transport;

/// Per-session key/value metadata, fixed at accept time.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Why a session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseCause {
    /// The transport returned a read error.
    ReadError,
    /// A write or heartbeat failed.
    WriteError,
    /// The peer sent a close frame.
    PeerClose,
    /// A close envelope was written.
    CloseSent,
    /// `request_close` was called (including hub shutdown).
    Requested,
}

impl CloseCause {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            CloseCause::ReadError => "read_error",
            CloseCause::WriteError => "write_error",
            CloseCause::PeerClose => "peer_close",
            CloseCause::CloseSent => "close_sent",
            CloseCause::Requested => "requested",
        }
    }
}

/// Handle to a `SessionActor`.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: Uuid,
    metadata: Metadata,
    connected_at: DateTime<Utc>,
    sender: mpsc::Sender<Arc<Envelope>>,
    capacity: usize,
    /// Set exactly once, by whoever tears the session down.
    closed: AtomicBool,
    /// Cancelled on teardown; both paths and pending direct sends watch it.
    shutdown: CancellationToken,
    mailbox: MailboxMonitor,
    hub: HubHandle,
}

impl Session {
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Metadata supplied when the connection was accepted.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.inner.metadata
    }

    /// Look up a single metadata value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.inner.metadata.get(key)
    }

    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.inner.connected_at
    }

    /// The hub this session belongs to. Lets callbacks fan out without
    /// holding the manager.
    #[must_use]
    pub fn hub(&self) -> &HubHandle {
        &self.inner.hub
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Envelopes currently waiting for the writer.
    #[must_use]
    pub fn mailbox_depth(&self) -> usize {
        self.inner
            .capacity
            .saturating_sub(self.inner.sender.capacity())
    }

    #[must_use]
    pub fn mailbox(&self) -> &MailboxMonitor {
        &self.inner.mailbox
    }

    /// Non-blocking enqueue, used by broadcasts.
    ///
    /// # Errors
    ///
    /// - `HubError::Closed` - the session has been torn down
    /// - `HubError::BufferFull` - the mailbox is at capacity; the envelope is dropped
    pub fn enqueue(&self, envelope: impl Into<Arc<Envelope>>) -> Result<(), HubError> {
        if self.is_closed() {
            return Err(HubError::Closed);
        }

        match self.inner.sender.try_send(envelope.into()) {
            Ok(()) => {
                self.inner.mailbox.record_enqueue(self.mailbox_depth());
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.inner.mailbox.record_drop();
                let e = HubError::BufferFull;
                metrics::record_message_dropped(e.kind_label());
                Err(e)
            }
            Err(TrySendError::Closed(_)) => {
                let e = HubError::Closed;
                metrics::record_message_dropped(e.kind_label());
                Err(e)
            }
        }
    }

    /// Enqueue, waiting for mailbox space. Gives up as soon as the session
    /// is torn down.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Closed` if the session is or becomes closed.
    pub async fn send_direct(&self, envelope: impl Into<Arc<Envelope>>) -> Result<(), HubError> {
        if self.is_closed() {
            return Err(HubError::Closed);
        }

        tokio::select! {
            biased;
            () = self.inner.shutdown.cancelled() => Err(HubError::Closed),
            sent = self.inner.sender.send(envelope.into()) => {
                sent.map_err(|_| HubError::Closed)?;
                self.inner.mailbox.record_enqueue(self.mailbox_depth());
                Ok(())
            }
        }
    }

    /// Send a text message to this session only.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Closed` if the session is closed.
    pub async fn send_text(&self, payload: impl Into<Bytes>) -> Result<(), HubError> {
        self.send_direct(Envelope::text(payload)).await
    }

    /// Send a binary message to this session only.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Closed` if the session is closed.
    pub async fn send_binary(&self, payload: impl Into<Bytes>) -> Result<(), HubError> {
        self.send_direct(Envelope::binary(payload)).await
    }

    /// Queue a close frame; the writer stops after sending it.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Closed` if the session is closed.
    pub async fn send_close(&self) -> Result<(), HubError> {
        self.send_direct(Envelope::close()).await
    }

    /// Queue a close frame carrying a status code and reason.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Closed` if the session is closed.
    pub async fn send_close_with(&self, code: u16, reason: &str) -> Result<(), HubError> {
        self.send_direct(Envelope::close_with(code, reason)).await
    }

    /// Force-close the session. Idempotent.
    ///
    /// Envelopes already in the mailbox are still flushed, best effort.
    pub fn request_close(&self) {
        self.teardown(CloseCause::Requested);
    }

    /// Mark the session closed and wake both paths.
    ///
    /// Returns `true` for the single caller that performed the transition.
    pub(crate) fn teardown(&self, cause: CloseCause) -> bool {
        if self
            .inner
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        info!(
            target: "socket_hub.actor.session",
            session_id = %self.inner.id,
            cause = cause.as_str(),
            "Session closing"
        );
        metrics::record_session_closed(cause.as_str());
        self.inner.shutdown.cancel();
        true
    }

    fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.inner.shutdown.cancelled()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Session {}

impl Hash for Session {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .field("connected_at", &self.inner.connected_at)
            .field("metadata_keys", &self.inner.metadata.len())
            .finish_non_exhaustive()
    }
}

/// The `SessionActor` implementation.
pub(crate) struct SessionActor {
    session: Session,
    /// Mailbox receiver, moved into the writer task.
    receiver: mpsc::Receiver<Arc<Envelope>>,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn SessionHandler>,
    write_wait: Duration,
    heartbeat_interval: Duration,
}

impl SessionActor {
    /// Build a session around `transport`. Nothing runs until [`Self::run`].
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        metadata: Metadata,
        hub: HubHandle,
        handler: Arc<dyn SessionHandler>,
        config: &Config,
    ) -> (Session, Self) {
        let id = Uuid::new_v4();
        let capacity = config.mailbox_capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);

        let session = Session {
            inner: Arc::new(SessionInner {
                id,
                metadata,
                connected_at: Utc::now(),
                sender,
                capacity,
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                mailbox: MailboxMonitor::new(id, capacity),
                hub,
            }),
        };

        let actor = Self {
            session: session.clone(),
            receiver,
            transport,
            handler,
            write_wait: config.write_wait,
            heartbeat_interval: config.heartbeat_interval,
        };

        (session, actor)
    }

    /// Drive the session until both paths have finished, then close the
    /// transport.
    #[instrument(
        skip_all,
        name = "socket_hub.actor.session",
        fields(session_id = %self.session.id())
    )]
    pub(crate) async fn run(self) {
        let Self {
            session,
            receiver,
            transport,
            handler,
            write_wait,
            heartbeat_interval,
        } = self;

        debug!(
            target: "socket_hub.actor.session",
            session_id = %session.id(),
            "SessionActor started"
        );

        // The writer must be live before on_connect so handlers can send.
        let writer = Writer {
            session: session.clone(),
            receiver,
            transport: Arc::clone(&transport),
            handler: Arc::clone(&handler),
            write_wait,
            heartbeat_interval,
        };
        let writer_task = tokio::spawn(writer.run());

        handler.on_connect(&session).await;

        read_loop(&session, transport.as_ref(), handler.as_ref()).await;

        if let Err(e) = writer_task.await {
            error!(
                target: "socket_hub.actor.session",
                session_id = %session.id(),
                error = %e,
                "Writer task failed"
            );
            session.teardown(CloseCause::WriteError);
        }

        transport.close().await;

        debug!(
            target: "socket_hub.actor.session",
            session_id = %session.id(),
            processed = session.mailbox().messages_processed(),
            dropped = session.mailbox().messages_dropped(),
            "SessionActor stopped"
        );
    }

    #[cfg(test)]
    pub(crate) fn drain_mailbox(&mut self) -> Vec<Arc<Envelope>> {
        let mut drained = Vec::new();
        while let Ok(envelope) = self.receiver.try_recv() {
            drained.push(envelope);
        }
        drained
    }
}

/// Reader path: dispatch inbound frames until teardown or a terminal frame.
async fn read_loop(session: &Session, transport: &dyn Transport, handler: &dyn SessionHandler) {
    loop {
        let frame = tokio::select! {
            () = session.cancelled() => {
                trace!(
                    target: "socket_hub.actor.session",
                    session_id = %session.id(),
                    "Reader observed teardown"
                );
                return;
            }
            frame = transport.read() => frame,
        };

        match frame {
            Ok((MessageKind::Text, payload)) => handler.on_message(session, payload).await,
            Ok((MessageKind::Binary, payload)) => handler.on_message_binary(session, payload).await,
            Ok((MessageKind::Pong, _)) => handler.on_pong(session).await,
            // Pings are answered by the transport
            Ok((MessageKind::Ping, _)) => {}
            Ok((MessageKind::Close, payload)) => {
                let (code, reason) = decode_close_payload(&payload);
                debug!(
                    target: "socket_hub.actor.session",
                    session_id = %session.id(),
                    code,
                    "Peer sent close frame"
                );
                if let Err(e) = handler.on_close(session, code, &reason).await {
                    handler.on_error(session, &e).await;
                }
                session.teardown(CloseCause::PeerClose);
                return;
            }
            Err(e) => {
                if !session.is_closed() {
                    let e = HubError::Transport(e);
                    warn!(
                        target: "socket_hub.actor.session",
                        session_id = %session.id(),
                        error = %e,
                        "Read failed"
                    );
                    handler.on_error(session, &e).await;
                }
                session.teardown(CloseCause::ReadError);
                return;
            }
        }
    }
}

/// Writer path: mailbox drain plus heartbeat.
struct Writer {
    session: Session,
    receiver: mpsc::Receiver<Arc<Envelope>>,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn SessionHandler>,
    write_wait: Duration,
    heartbeat_interval: Duration,
}

impl Writer {
    async fn run(mut self) {
        let period = self.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.session.cancelled() => {
                    self.flush().await;
                    break;
                }

                next = self.receiver.recv() => {
                    // The session owns the sender, so the mailbox stays open
                    // for as long as this loop runs
                    let Some(envelope) = next else {
                        break;
                    };
                    self.session.mailbox().record_dequeue();

                    match self.write(&envelope).await {
                        Ok(()) if envelope.kind() == MessageKind::Close => {
                            self.session.teardown(CloseCause::CloseSent);
                            break;
                        }
                        Ok(()) => {}
                        Err(e) => {
                            self.fail(&e).await;
                            break;
                        }
                    }
                }

                _ = heartbeat.tick() => {
                    trace!(
                        target: "socket_hub.actor.session",
                        session_id = %self.session.id(),
                        "Sending heartbeat"
                    );
                    if let Err(e) = self.write(&Envelope::ping()).await {
                        metrics::record_heartbeat_failure();
                        self.fail(&e).await;
                        break;
                    }
                }
            }
        }

        // Pending direct sends fail fast from here on
        self.receiver.close();
    }

    /// Best-effort flush of envelopes queued before teardown.
    ///
    /// Failures here are logged, not reported.
    async fn flush(&mut self) {
        let mut flushed = 0usize;
        while let Ok(envelope) = self.receiver.try_recv() {
            self.session.mailbox().record_dequeue();
            match self.write(&envelope).await {
                Ok(()) => flushed += 1,
                Err(e) => {
                    debug!(
                        target: "socket_hub.actor.session",
                        session_id = %self.session.id(),
                        error = %e,
                        "Flush aborted"
                    );
                    break;
                }
            }
            if envelope.kind() == MessageKind::Close {
                break;
            }
        }

        if flushed > 0 {
            debug!(
                target: "socket_hub.actor.session",
                session_id = %self.session.id(),
                flushed,
                "Flushed pending envelopes"
            );
        }
    }

    /// Write one envelope within the write wait and fire sent callbacks.
    async fn write(&self, envelope: &Envelope) -> Result<(), HubError> {
        let kind = envelope.kind();
        let started = Instant::now();

        match tokio::time::timeout(
            self.write_wait,
            self.transport
                .write(kind, envelope.payload().clone(), self.write_wait),
        )
        .await
        {
            Err(_) => return Err(TransportError::Timeout(self.write_wait).into()),
            Ok(result) => result?,
        }

        metrics::record_write_duration(kind.as_str(), started.elapsed());

        match kind {
            MessageKind::Text => {
                self.handler
                    .on_message_sent(&self.session, envelope.payload())
                    .await;
            }
            MessageKind::Binary => {
                self.handler
                    .on_message_sent_binary(&self.session, envelope.payload())
                    .await;
            }
            MessageKind::Close | MessageKind::Ping | MessageKind::Pong => {}
        }

        Ok(())
    }

    async fn fail(&self, e: &HubError) {
        if !self.session.is_closed() {
            warn!(
                target: "socket_hub.actor.session",
                session_id = %self.session.id(),
                error = %e,
                "Write failed"
            );
            self.handler.on_error(&self.session, e).await;
        }
        self.session.teardown(CloseCause::WriteError);
    }
}
