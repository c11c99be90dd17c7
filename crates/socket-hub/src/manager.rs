//! The public façade.
//!
//! A [`Manager`] owns one hub and one handler. Applications hand it every
//! accepted transport through [`Manager::accept`] and fan out through the
//! `broadcast_*` family.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, instrument};

use crate::actors::{HubHandle, HubStatus, Metadata, Session, SessionActor};
use crate::config::Config;
use crate::envelope::Envelope;
use crate::errors::HubError;
use crate::handler::SessionHandler;
use crate::transport::Transport;

/// Connection registry and fan-out engine.
pub struct Manager {
    config: Config,
    hub: HubHandle,
    handler: Arc<dyn SessionHandler>,
}

impl Manager {
    /// Manager with default configuration.
    ///
    /// Must be called from within a Tokio runtime; the hub loop is spawned
    /// immediately.
    #[must_use]
    pub fn new<H: SessionHandler>(handler: H) -> Self {
        Self::build(Config::default(), Arc::new(handler))
    }

    /// Manager with explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Config` if `config` fails validation.
    pub fn with_config<H: SessionHandler>(config: Config, handler: H) -> Result<Self, HubError> {
        config.validate()?;
        Ok(Self::build(config, Arc::new(handler)))
    }

    fn build(config: Config, handler: Arc<dyn SessionHandler>) -> Self {
        let hub = HubHandle::spawn(Arc::clone(&handler));
        info!(
            target: "socket_hub.manager",
            mailbox_capacity = config.mailbox_capacity,
            heartbeat_interval_ms = config.heartbeat_interval.as_millis(),
            "Manager started"
        );
        Self {
            config,
            hub,
            handler,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The hub handle, for code that only needs fan-out.
    #[must_use]
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Adopt an upgraded transport and drive it until the session ends.
    ///
    /// Registers the session, runs it on the calling task, then unregisters
    /// it and fires `on_disconnect` exactly once.
    ///
    /// # Errors
    ///
    /// Returns `HubError::InstanceClosed` after shutdown; the transport is
    /// closed before returning.
    #[instrument(skip_all, name = "socket_hub.manager.accept")]
    pub async fn accept<T: Transport>(
        &self,
        transport: T,
        metadata: Metadata,
    ) -> Result<(), HubError> {
        if self.hub.is_closed() {
            debug!(target: "socket_hub.manager", "Connection refused after shutdown");
            transport.close().await;
            return Err(HubError::InstanceClosed);
        }

        let (session, actor) = SessionActor::new(
            Arc::new(transport),
            metadata,
            self.hub.clone(),
            Arc::clone(&self.handler),
            &self.config,
        );

        debug!(
            target: "socket_hub.manager",
            session_id = %session.id(),
            "Connection accepted"
        );

        self.hub.register(session.clone());
        actor.run().await;
        self.hub.unregister(&session);
        self.handler.on_disconnect(&session).await;

        Ok(())
    }

    /// Enqueue `envelope` on every session its filter accepts.
    ///
    /// # Errors
    ///
    /// Returns `HubError::InstanceClosed` after shutdown.
    pub fn broadcast(&self, envelope: Envelope) -> Result<(), HubError> {
        self.hub.broadcast(envelope)
    }

    /// Text to every session.
    ///
    /// # Errors
    ///
    /// Returns `HubError::InstanceClosed` after shutdown.
    pub fn broadcast_text(&self, payload: impl Into<Bytes>) -> Result<(), HubError> {
        self.hub.broadcast_text(payload)
    }

    /// Binary to every session.
    ///
    /// # Errors
    ///
    /// Returns `HubError::InstanceClosed` after shutdown.
    pub fn broadcast_binary(&self, payload: impl Into<Bytes>) -> Result<(), HubError> {
        self.hub.broadcast_binary(payload)
    }

    /// Text to every session for which `filter` returns true.
    ///
    /// # Errors
    ///
    /// Returns `HubError::InstanceClosed` after shutdown.
    pub fn broadcast_filter<F>(&self, payload: impl Into<Bytes>, filter: F) -> Result<(), HubError>
    where
        F: Fn(&Session) -> bool + Send + Sync + 'static,
    {
        self.hub.broadcast_filter(payload, filter)
    }

    /// Binary to every session for which `filter` returns true.
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
        self.hub.broadcast_binary_filter(payload, filter)
    }

    /// Text to every session except `excluded`.
    ///
    /// # Errors
    ///
    /// Returns `HubError::InstanceClosed` after shutdown.
    pub fn broadcast_except(
        &self,
        payload: impl Into<Bytes>,
        excluded: &Session,
    ) -> Result<(), HubError> {
        self.hub.broadcast_except(payload, excluded)
    }

    /// Direct text send to each listed session, in order.
    ///
    /// Bypasses the hub. Stops at the first failure; sessions before it
    /// have already been sent to.
    ///
    /// # Errors
    ///
    /// - `HubError::InstanceClosed` - the manager has been shut down
    /// - `HubError::Closed` - one of the sessions is closed
    pub async fn send_to_many(
        &self,
        payload: impl Into<Bytes>,
        sessions: &[Session],
    ) -> Result<(), HubError> {
        if self.hub.is_closed() {
            return Err(HubError::InstanceClosed);
        }

        let envelope = Arc::new(Envelope::text(payload));
        for session in sessions {
            session.send_direct(Arc::clone(&envelope)).await?;
        }
        Ok(())
    }

    /// Close every session with an empty close frame and stop accepting.
    ///
    /// # Errors
    ///
    /// Returns `HubError::InstanceClosed` on a second call, including one
    /// that raced the first.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        self.shutdown_with(Envelope::close()).await
    }

    /// Shutdown delivering a custom final envelope, e.g.
    /// `Envelope::close_with(1001, "going away")`.
    ///
    /// # Errors
    ///
    /// Returns `HubError::InstanceClosed` on a second call.
    #[instrument(skip_all, name = "socket_hub.manager.shutdown")]
    pub async fn shutdown_with(&self, envelope: Envelope) -> Result<(), HubError> {
        info!(
            target: "socket_hub.manager",
            sessions = self.hub.len(),
            "Shutting down"
        );
        self.hub.shutdown(envelope).await
    }

    /// Ordered status snapshot from the hub loop.
    ///
    /// # Errors
    ///
    /// Returns `HubError::InstanceClosed` if the hub task is gone.
    pub async fn status(&self) -> Result<HubStatus, HubError> {
        self.hub.status().await
    }

    /// Registered session count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hub.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hub.is_empty()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.hub.is_closed()
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("config", &self.config)
            .field("hub", &self.hub)
            .finish_non_exhaustive()
    }
}
