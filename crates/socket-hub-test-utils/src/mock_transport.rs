//! Scripted in-memory transport.
//!
//! Inbound frames are pushed by the test and handed out by `read` in order;
//! once the script is exhausted `read` waits forever, like an idle peer.
//! Every successful write is recorded.
//!
//! # Example
//!
//! ```rust,ignore
//! use socket_hub_test_utils::MockTransport;
//!
//! let transport = MockTransport::new();
//! transport.push_text("hello");
//! transport.push_read_error("connection reset");
//!
//! let accept = tokio::spawn({
//!     let transport = transport.clone();
//!     async move { manager.accept(transport, Metadata::new()).await }
//! });
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use socket_hub::envelope::encode_close_payload;
use socket_hub::{MessageKind, Transport, TransportError};
use tokio::sync::{mpsc, watch};

use crate::WAIT_TIMEOUT;

type Inbound = Result<(MessageKind, Bytes), TransportError>;

/// One recorded outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageKind,
    pub payload: Bytes,
}

/// Which writes should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteFailure {
    None,
    All,
    PingsOnly,
}

/// In-memory [`Transport`] for session tests.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockTransportInner>,
}

struct MockTransportInner {
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
    writes: Mutex<Vec<Frame>>,
    /// Number of recorded writes.
    written: watch::Sender<usize>,
    /// Number of write calls, including failed and held ones.
    attempts: watch::Sender<usize>,
    /// Writes block while true.
    held: watch::Sender<bool>,
    failure: Mutex<WriteFailure>,
    write_delay: Mutex<Option<Duration>>,
    closed: AtomicBool,
    close_calls: watch::Sender<usize>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(MockTransportInner {
                inbound_tx,
                inbound_rx: tokio::sync::Mutex::new(inbound_rx),
                writes: Mutex::new(Vec::new()),
                written: watch::channel(0).0,
                attempts: watch::channel(0).0,
                held: watch::channel(false).0,
                failure: Mutex::new(WriteFailure::None),
                write_delay: Mutex::new(None),
                closed: AtomicBool::new(false),
                close_calls: watch::channel(0).0,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Inbound script
    // ------------------------------------------------------------------

    pub fn push_frame(&self, kind: MessageKind, payload: impl Into<Bytes>) {
        self.inner
            .inbound_tx
            .send(Ok((kind, payload.into())))
            .unwrap();
    }

    pub fn push_text(&self, text: &str) {
        self.push_frame(MessageKind::Text, Bytes::copy_from_slice(text.as_bytes()));
    }

    pub fn push_binary(&self, data: impl Into<Bytes>) {
        self.push_frame(MessageKind::Binary, data);
    }

    pub fn push_pong(&self) {
        self.push_frame(MessageKind::Pong, Bytes::new());
    }

    pub fn push_close(&self, code: u16, reason: &str) {
        self.push_frame(MessageKind::Close, encode_close_payload(code, reason));
    }

    /// Make the next `read` after the queued frames fail.
    pub fn push_read_error(&self, message: &str) {
        self.inner
            .inbound_tx
            .send(Err(TransportError::Read(message.to_string())))
            .unwrap();
    }

    // ------------------------------------------------------------------
    // Write behavior
    // ------------------------------------------------------------------

    /// Every write from now on fails.
    pub fn fail_writes(&self) {
        *self.inner.failure.lock().unwrap() = WriteFailure::All;
    }

    /// Only heartbeat pings fail.
    pub fn fail_pings(&self) {
        *self.inner.failure.lock().unwrap() = WriteFailure::PingsOnly;
    }

    /// Block writes until [`Self::release_writes`].
    pub fn hold_writes(&self) {
        self.inner.held.send_replace(true);
    }

    pub fn release_writes(&self) {
        self.inner.held.send_replace(false);
    }

    /// Each write sleeps this long first (use with paused time).
    pub fn set_write_delay(&self, delay: Duration) {
        *self.inner.write_delay.lock().unwrap() = Some(delay);
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn writes(&self) -> Vec<Frame> {
        self.inner.writes.lock().unwrap().clone()
    }

    /// Recorded frames of one kind.
    pub fn frames(&self, kind: MessageKind) -> Vec<Frame> {
        self.writes()
            .into_iter()
            .filter(|frame| frame.kind == kind)
            .collect()
    }

    /// Recorded text frames, decoded.
    pub fn texts(&self) -> Vec<String> {
        self.frames(MessageKind::Text)
            .into_iter()
            .map(|frame| String::from_utf8(frame.payload.to_vec()).unwrap())
            .collect()
    }

    pub fn close_count(&self) -> usize {
        *self.inner.close_calls.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` frames have been recorded.
    pub async fn wait_for_writes(&self, n: usize) -> Vec<Frame> {
        wait_for_count(&self.inner.written, n, "recorded writes").await;
        self.writes()
    }

    /// Wait until `write` has been entered at least `n` times.
    pub async fn wait_for_write_attempts(&self, n: usize) {
        wait_for_count(&self.inner.attempts, n, "write attempts").await;
    }

    /// Wait until `close` has been called.
    pub async fn wait_closed(&self) {
        wait_for_count(&self.inner.close_calls, 1, "transport close").await;
    }
}

async fn wait_for_count(counter: &watch::Sender<usize>, n: usize, what: &str) {
    let mut rx = counter.subscribe();
    let reached = tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(|count| *count >= n)).await;
    assert!(
        matches!(reached, Ok(Ok(_))),
        "timed out waiting for {n} {what}, saw {}",
        *counter.borrow()
    );
}

#[async_trait]
impl Transport for MockTransport {
    async fn read(&self) -> Result<(MessageKind, Bytes), TransportError> {
        let mut inbound = self.inner.inbound_rx.lock().await;
        match inbound.recv().await {
            Some(frame) => frame,
            None => Err(TransportError::Closed),
        }
    }

    async fn write(
        &self,
        kind: MessageKind,
        payload: Bytes,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        self.inner.attempts.send_modify(|count| *count += 1);

        let mut held = self.inner.held.subscribe();
        let _ = held.wait_for(|held| !*held).await;

        let delay = *self.inner.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let failure = *self.inner.failure.lock().unwrap();
        match failure {
            WriteFailure::All => {
                return Err(TransportError::Write("injected write failure".to_string()))
            }
            WriteFailure::PingsOnly if kind == MessageKind::Ping => {
                return Err(TransportError::Write("injected ping failure".to_string()))
            }
            _ => {}
        }

        self.inner.writes.lock().unwrap().push(Frame { kind, payload });
        self.inner.written.send_modify(|count| *count += 1);
        Ok(())
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.close_calls.send_modify(|count| *count += 1);
    }
}
