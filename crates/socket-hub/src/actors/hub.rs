//! `HubActor` - the session registry.
//!
//! The hub is the single owner of the member set. Registration, removal,
//! broadcast and shutdown are all commands on one queue, drained by one
//! task, so membership never changes in the middle of a fan-out.
//!
//! # Shutdown
//!
//! On shutdown the hub:
//! 1. Enqueues the final envelope on every member
//! 2. Force-closes every member and empties the set
//! 3. Rejects later registrations and broadcasts
//!
//! The task itself keeps draining the queue until every handle is gone so
//! that late `unregister` calls from finishing sessions never block.
//!
//! The loop never awaits application code. Delivery failures found during
//! a fan-out are reported to `on_error` from a separate task, so a slow or
//! re-entrant callback cannot hold up other commands.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::messages::{HubMessage, HubStatus};
use super::session::Session;
use crate::envelope::Envelope;
use crate::errors::HubError;
use crate::handler::SessionHandler;
use crate::observability::metrics;

/// Snapshot published by the hub loop after every command.
#[derive(Debug, Default)]
struct HubState {
    members: AtomicUsize,
    closed: AtomicBool,
}

/// Handle to the `HubActor`.
///
/// Cheap to clone. Every session carries one, so callbacks can fan out
/// through [`Session::hub`].
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::UnboundedSender<HubMessage>,
    state: Arc<HubState>,
}

impl HubHandle {
    /// Spawn the hub loop and return a handle to it.
    #[must_use]
    pub(crate) fn spawn(handler: Arc<dyn SessionHandler>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(HubState::default());

        let actor = HubActor {
            receiver,
            members: HashMap::new(),
            state: Arc::clone(&state),
            handler,
            commands_processed: 0,
        };
        tokio::spawn(actor.run());

        Self { sender, state }
    }

    /// Add a session. If the hub is gone the session is closed instead.
    pub(crate) fn register(&self, session: Session) {
        if let Err(mpsc::error::SendError(HubMessage::Register { session })) =
            self.sender.send(HubMessage::Register { session })
        {
            session.request_close();
        }
    }

    /// Remove a session. Removing a non-member is a no-op.
    pub(crate) fn unregister(&self, session: &Session) {
        // Hub already gone means the member set is gone too
        let _ = self.sender.send(HubMessage::Unregister {
            session_id: session.id(),
        });
    }

    /// Enqueue `envelope` on every member its filter accepts.
    ///
    /// Returns once the command is queued; delivery happens on the hub loop
    /// and per-session failures go to `on_error`.
    ///
    /// # Errors
    ///
    /// Returns `HubError::InstanceClosed` after shutdown.
    pub fn broadcast(&self, envelope: Envelope) -> Result<(), HubError> {
        if self.is_closed() {
            let e = HubError::InstanceClosed;
            metrics::record_message_dropped(e.kind_label());
            return Err(e);
        }

        self.sender
            .send(HubMessage::Broadcast {
                envelope: Arc::new(envelope),
            })
            .map_err(|_| HubError::InstanceClosed)
    }

    /// Text to every member.
    ///
    /// # Errors
    ///
    /// Returns `HubError::InstanceClosed` after shutdown.
    pub fn broadcast_text(&self, payload: impl Into<Bytes>) -> Result<(), HubError> {
        self.broadcast(Envelope::text(payload))
    }

    /// Binary to every member.
    ///
    /// # Errors
    ///
    /// Returns `HubError::InstanceClosed` after shutdown.
    pub fn broadcast_binary(&self, payload: impl Into<Bytes>) -> Result<(), HubError> {
        self.broadcast(Envelope::binary(payload))
    }

    /// Text to every member for which `filter` returns true.
    ///
    /// # Errors
    ///
    /// Returns `HubError::InstanceClosed` after shutdown.
    pub fn broadcast_filter<F>(&self, payload: impl Into<Bytes>, filter: F) -> Result<(), HubError>
    where
        F: Fn(&Session) -> bool + Send + Sync + 'static,
    {
        self.broadcast(Envelope::text(payload).with_filter(filter))
    }

    /// Binary to every member for which `filter` returns true.
    ///
    /// # Errors
    ///
    /// Returns `HubError::InstanceClosed` after shutdown.
    pub fn broadcast_binary_filter<F>(
        &self,
        payload: impl Into<Bytes>,
        filter: F,
    ) -> Result<(), HubError>
    where
        F: Fn(&Session) -> bool + Send + Sync + 'static,
    {
        self.broadcast(Envelope::binary(payload).with_filter(filter))
    }

    /// Text to every member except `excluded`.
    ///
    /// # Errors
    ///
    /// Returns `HubError::InstanceClosed` after shutdown.
    pub fn broadcast_except(
        &self,
        payload: impl Into<Bytes>,
        excluded: &Session,
    ) -> Result<(), HubError> {
        let excluded_id = excluded.id();
        self.broadcast_filter(payload, move |session| session.id() != excluded_id)
    }

    /// Deliver `envelope` to every member, close them all and stop.
    ///
    /// Waits until the hub has processed the command. When several calls
    /// race, exactly one returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns `HubError::InstanceClosed` if another shutdown took effect
    /// first.
    pub async fn shutdown(&self, envelope: Envelope) -> Result<(), HubError> {
        if self.is_closed() {
            return Err(HubError::InstanceClosed);
        }

        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubMessage::Shutdown {
                envelope: Arc::new(envelope),
                respond_to: tx,
            })
            .map_err(|_| HubError::InstanceClosed)?;

        rx.await.map_err(|_| HubError::InstanceClosed)?
    }

    /// Status as of every command queued before this call.
    ///
    /// # Errors
    ///
    /// Returns `HubError::InstanceClosed` if the hub task is gone.
    pub async fn status(&self) -> Result<HubStatus, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubMessage::GetStatus { respond_to: tx })
            .map_err(|_| HubError::InstanceClosed)?;

        rx.await.map_err(|_| HubError::InstanceClosed)
    }

    /// Current member count, as last published by the hub loop.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.members.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether shutdown has been processed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for HubHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubHandle")
            .field("members", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The `HubActor` implementation.
struct HubActor {
    receiver: mpsc::UnboundedReceiver<HubMessage>,
    members: HashMap<Uuid, Session>,
    state: Arc<HubState>,
    handler: Arc<dyn SessionHandler>,
    commands_processed: u64,
}

impl HubActor {
    #[instrument(skip_all, name = "socket_hub.actor.hub")]
    async fn run(mut self) {
        info!(target: "socket_hub.actor.hub", "HubActor started");

        while let Some(message) = self.receiver.recv().await {
            self.handle_message(message);
            self.commands_processed += 1;
        }

        info!(
            target: "socket_hub.actor.hub",
            commands_processed = self.commands_processed,
            "HubActor stopped"
        );
    }

    fn handle_message(&mut self, message: HubMessage) {
        match message {
            HubMessage::Register { session } => {
                if self.is_closed() {
                    debug!(
                        target: "socket_hub.actor.hub",
                        session_id = %session.id(),
                        "Registration after shutdown, closing session"
                    );
                    session.request_close();
                    return;
                }

                debug!(
                    target: "socket_hub.actor.hub",
                    session_id = %session.id(),
                    "Session registered"
                );
                self.members.insert(session.id(), session);
                self.publish();
            }

            HubMessage::Unregister { session_id } => {
                if self.members.remove(&session_id).is_some() {
                    debug!(
                        target: "socket_hub.actor.hub",
                        session_id = %session_id,
                        "Session unregistered"
                    );
                    self.publish();
                }
            }

            HubMessage::Broadcast { envelope } => {
                if self.is_closed() {
                    debug!(
                        target: "socket_hub.actor.hub",
                        kind = envelope.kind().as_str(),
                        "Broadcast after shutdown dropped"
                    );
                    metrics::record_message_dropped(HubError::InstanceClosed.kind_label());
                    return;
                }
                self.fan_out(&envelope);
            }

            HubMessage::Shutdown {
                envelope,
                respond_to,
            } => {
                let result = if self.is_closed() {
                    debug!(target: "socket_hub.actor.hub", "Hub already shut down");
                    Err(HubError::InstanceClosed)
                } else {
                    self.shutdown(&envelope);
                    Ok(())
                };
                let _ = respond_to.send(result);
            }

            HubMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(HubStatus {
                    member_count: self.members.len(),
                    is_closed: self.is_closed(),
                    commands_processed: self.commands_processed,
                });
            }
        }
    }

    fn fan_out(&self, envelope: &Arc<Envelope>) {
        metrics::record_broadcast(envelope.kind().as_str());

        let mut delivered = 0usize;
        let mut failed = 0usize;
        for session in self.members.values() {
            if !envelope.accepts(session) {
                continue;
            }
            match session.enqueue(Arc::clone(envelope)) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    failed += 1;
                    if e.is_fatal() {
                        debug!(
                            target: "socket_hub.actor.hub",
                            session_id = %session.id(),
                            error = %e,
                            "Skipping member that is going away"
                        );
                    }
                    self.report_error(session, e);
                }
            }
        }

        debug!(
            target: "socket_hub.actor.hub",
            kind = envelope.kind().as_str(),
            filtered = envelope.has_filter(),
            delivered,
            failed,
            "Broadcast fanned out"
        );
    }

    /// Hand a delivery failure to `on_error` off the hub loop.
    fn report_error(&self, session: &Session, error: HubError) {
        let handler = Arc::clone(&self.handler);
        let session = session.clone();
        tokio::spawn(async move {
            handler.on_error(&session, &error).await;
        });
    }

    fn shutdown(&mut self, envelope: &Arc<Envelope>) {
        let member_count = self.members.len();
        info!(
            target: "socket_hub.actor.hub",
            member_count,
            "Hub shutting down"
        );

        for (_, session) in self.members.drain() {
            if let Err(e) = session.enqueue(Arc::clone(envelope)) {
                warn!(
                    target: "socket_hub.actor.hub",
                    session_id = %session.id(),
                    error = %e,
                    "Final envelope not delivered"
                );
            }
            session.request_close();
        }

        self.state.closed.store(true, Ordering::Release);
        self.publish();
    }

    fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    fn publish(&self) {
        let count = self.members.len();
        self.state.members.store(count, Ordering::Release);
        metrics::set_sessions_active(count);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::session::tests::detached_session_on;
    use crate::actors::session::SessionActor;
    use crate::envelope::MessageKind;
    use crate::handler::NoopHandler;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    /// Records `on_error` calls. With `reenter` set, each call first does a
    /// status round-trip through the session's hub.
    #[derive(Default)]
    struct ErrorLog {
        errors: Mutex<Vec<(Uuid, HubError)>>,
        reenter: bool,
    }

    impl ErrorLog {
        /// Wait until `n` errors have been reported.
        async fn wait_for(&self, n: usize) -> Vec<(Uuid, HubError)> {
            tokio::time::timeout(WAIT, async {
                loop {
                    let errors = self.errors.lock().unwrap().clone();
                    if errors.len() >= n {
                        return errors;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("timed out waiting for on_error")
        }
    }

    #[async_trait]
    impl SessionHandler for ErrorLog {
        async fn on_error(&self, session: &Session, error: &HubError) {
            if self.reenter {
                session.hub().status().await.unwrap();
            }
            self.errors
                .lock()
                .unwrap()
                .push((session.id(), error.clone()));
        }
    }

    fn payloads(actor: &mut SessionActor) -> Vec<(MessageKind, Bytes)> {
        actor
            .drain_mailbox()
            .iter()
            .map(|envelope| (envelope.kind(), envelope.payload().clone()))
            .collect()
    }

    fn text(s: &'static str) -> (MessageKind, Bytes) {
        (MessageKind::Text, Bytes::from_static(s.as_bytes()))
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let hub = HubHandle::spawn(Arc::new(NoopHandler));
        let (a, _actor_a) = detached_session_on(&hub, 4);
        let (b, _actor_b) = detached_session_on(&hub, 4);

        hub.register(a.clone());
        hub.register(b.clone());
        assert_eq!(hub.status().await.unwrap().member_count, 2);
        assert_eq!(hub.len(), 2);

        hub.unregister(&a);
        // Removing twice is harmless
        hub.unregister(&a);
        let status = hub.status().await.unwrap();
        assert_eq!(status.member_count, 1);
        assert!(!status.is_closed);
        assert_eq!(hub.len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_member_once() {
        let hub = HubHandle::spawn(Arc::new(NoopHandler));
        let mut actors = Vec::new();
        for _ in 0..3 {
            let (session, actor) = detached_session_on(&hub, 4);
            hub.register(session);
            actors.push(actor);
        }

        hub.broadcast_text("hello").unwrap();
        hub.status().await.unwrap();

        for actor in &mut actors {
            assert_eq!(payloads(actor), vec![text("hello")]);
        }
    }

    #[tokio::test]
    async fn test_broadcast_except_and_filter() {
        let hub = HubHandle::spawn(Arc::new(NoopHandler));
        let (a, mut actor_a) = detached_session_on(&hub, 4);
        let (b, mut actor_b) = detached_session_on(&hub, 4);
        hub.register(a.clone());
        hub.register(b.clone());

        hub.broadcast_except("from-a", &a).unwrap();
        let only_b = b.id();
        hub.broadcast_binary_filter(vec![7u8], move |s| s.id() == only_b)
            .unwrap();
        hub.broadcast_filter("nobody", |_| false).unwrap();
        hub.status().await.unwrap();

        assert!(payloads(&mut actor_a).is_empty());
        assert_eq!(
            payloads(&mut actor_b),
            vec![text("from-a"), (MessageKind::Binary, Bytes::from(vec![7u8]))]
        );
    }

    #[tokio::test]
    async fn test_full_mailbox_reports_error_and_spares_others() {
        let log = Arc::new(ErrorLog::default());
        let hub = HubHandle::spawn(Arc::clone(&log) as Arc<dyn SessionHandler>);
        let (a, mut actor_a) = detached_session_on(&hub, 1);
        let (b, mut actor_b) = detached_session_on(&hub, 1);
        hub.register(a.clone());
        hub.register(b.clone());

        a.enqueue(Envelope::text("x")).unwrap();
        hub.broadcast_text("y").unwrap();
        hub.status().await.unwrap();

        assert_eq!(log.wait_for(1).await, vec![(a.id(), HubError::BufferFull)]);
        assert_eq!(payloads(&mut actor_a), vec![text("x")]);
        assert_eq!(payloads(&mut actor_b), vec![text("y")]);
        assert!(!a.is_closed());
    }

    #[tokio::test]
    async fn test_broadcast_to_closed_member_reports_closed() {
        let log = Arc::new(ErrorLog::default());
        let hub = HubHandle::spawn(Arc::clone(&log) as Arc<dyn SessionHandler>);
        let (a, _actor_a) = detached_session_on(&hub, 4);
        hub.register(a.clone());
        a.request_close();

        hub.broadcast_text("late").unwrap();
        hub.status().await.unwrap();

        assert_eq!(log.wait_for(1).await, vec![(a.id(), HubError::Closed)]);
    }

    #[tokio::test]
    async fn test_error_callback_can_call_back_into_hub() {
        let log = Arc::new(ErrorLog {
            reenter: true,
            ..ErrorLog::default()
        });
        let hub = HubHandle::spawn(Arc::clone(&log) as Arc<dyn SessionHandler>);
        let (a, _actor_a) = detached_session_on(&hub, 1);
        let (b, mut actor_b) = detached_session_on(&hub, 1);
        hub.register(a.clone());
        hub.register(b.clone());

        a.enqueue(Envelope::text("x")).unwrap();
        hub.broadcast_text("y").unwrap();

        // The hub keeps serving commands while on_error is in flight
        let status = tokio::time::timeout(WAIT, hub.status())
            .await
            .expect("hub stalled behind on_error")
            .unwrap();
        assert_eq!(status.member_count, 2);
        assert_eq!(payloads(&mut actor_b), vec![text("y")]);

        assert_eq!(log.wait_for(1).await, vec![(a.id(), HubError::BufferFull)]);
        tokio::time::timeout(WAIT, hub.status())
            .await
            .expect("hub stalled after on_error")
            .unwrap();
    }

    #[tokio::test]
    async fn test_queued_shutdowns_resolve_once() {
        let hub = HubHandle::spawn(Arc::new(NoopHandler));
        let (a, mut actor_a) = detached_session_on(&hub, 4);
        hub.register(a.clone());

        // Both pass the closed check before the hub sees either
        let (first, second) = tokio::join!(
            hub.shutdown(Envelope::close()),
            hub.shutdown(Envelope::close())
        );

        assert_eq!(first, Ok(()));
        assert_eq!(second, Err(HubError::InstanceClosed));
        assert_eq!(payloads(&mut actor_a), vec![(MessageKind::Close, Bytes::new())]);
        assert!(a.is_closed());
    }

    #[tokio::test]
    async fn test_shutdown_delivers_close_and_empties() {
        let hub = HubHandle::spawn(Arc::new(NoopHandler));
        let (a, mut actor_a) = detached_session_on(&hub, 4);
        let (b, mut actor_b) = detached_session_on(&hub, 4);
        hub.register(a.clone());
        hub.register(b.clone());

        hub.shutdown(Envelope::close()).await.unwrap();

        assert!(hub.is_closed());
        assert_eq!(hub.len(), 0);
        assert!(a.is_closed());
        assert!(b.is_closed());
        for actor in [&mut actor_a, &mut actor_b] {
            assert_eq!(payloads(actor), vec![(MessageKind::Close, Bytes::new())]);
        }

        assert_eq!(
            hub.shutdown(Envelope::close()).await,
            Err(HubError::InstanceClosed)
        );
        assert_eq!(hub.broadcast_text("after"), Err(HubError::InstanceClosed));
    }

    #[tokio::test]
    async fn test_register_after_shutdown_closes_session() {
        let hub = HubHandle::spawn(Arc::new(NoopHandler));
        hub.shutdown(Envelope::close()).await.unwrap();

        let (late, _actor) = detached_session_on(&hub, 4);
        hub.register(late.clone());
        let status = hub.status().await.unwrap();

        assert_eq!(status.member_count, 0);
        assert!(status.is_closed);
        assert!(late.is_closed());
    }

    #[tokio::test]
    async fn test_concurrent_unregister_during_broadcasts() {
        let hub = HubHandle::spawn(Arc::new(NoopHandler));
        let mut sessions = Vec::new();
        let mut actors = Vec::new();
        for _ in 0..16 {
            let (session, actor) = detached_session_on(&hub, 64);
            hub.register(session.clone());
            sessions.push(session);
            actors.push(actor);
        }

        let broadcaster = {
            let hub = hub.clone();
            tokio::spawn(async move {
                for _ in 0..32 {
                    hub.broadcast_text("tick").unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        let leavers = {
            let hub = hub.clone();
            let leaving: Vec<Session> = sessions.iter().step_by(2).cloned().collect();
            tokio::spawn(async move {
                for session in leaving {
                    hub.unregister(&session);
                    tokio::task::yield_now().await;
                }
            })
        };

        broadcaster.await.unwrap();
        leavers.await.unwrap();
        let status = hub.status().await.unwrap();
        assert_eq!(status.member_count, 8);

        // Members that stayed saw every broadcast; leavers saw a prefix
        for (index, actor) in actors.iter_mut().enumerate() {
            let received = payloads(actor).len();
            if index % 2 == 0 {
                assert!(received <= 32);
            } else {
                assert_eq!(received, 32);
            }
        }
    }
}
