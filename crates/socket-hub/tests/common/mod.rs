//! Helpers shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use socket_hub::{HubError, Manager, Metadata, Session};
use socket_hub_test_utils::{MockTransport, RecordingHandler, WAIT_TIMEOUT};
use tokio::task::JoinHandle;

pub type AcceptTask = JoinHandle<Result<(), HubError>>;

/// Run `accept` for `transport` on its own task.
pub fn spawn_accept(
    manager: &Arc<Manager>,
    transport: &MockTransport,
    metadata: Metadata,
) -> AcceptTask {
    let manager = Arc::clone(manager);
    let transport = transport.clone();
    tokio::spawn(async move { manager.accept(transport, metadata).await })
}

/// Metadata tagging a session with its position in a test.
pub fn indexed(index: usize) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("index".to_string(), serde_json::json!(index));
    metadata
}

/// A connected session with its transport and accept task.
pub struct Peer {
    pub session: Session,
    pub transport: MockTransport,
    pub task: AcceptTask,
}

/// Connect `n` mock peers and wait until all are registered.
///
/// Peers are returned in index order, regardless of connect order.
pub async fn connect_peers(
    manager: &Arc<Manager>,
    handler: &RecordingHandler,
    n: usize,
) -> Vec<Peer> {
    let mut pending: Vec<(MockTransport, AcceptTask)> = (0..n)
        .map(|index| {
            let transport = MockTransport::new();
            let task = spawn_accept(manager, &transport, indexed(index));
            (transport, task)
        })
        .collect();

    let mut sessions = handler.wait_for_connects(n).await;
    sessions.sort_by_key(|session| session.get("index").and_then(serde_json::Value::as_u64));
    wait_for_members(manager, n).await;

    sessions
        .into_iter()
        .zip(pending.drain(..))
        .map(|(session, (transport, task))| Peer {
            session,
            transport,
            task,
        })
        .collect()
}

/// Wait until the hub reports exactly `n` members.
pub async fn wait_for_members(manager: &Manager, n: usize) {
    let reached = tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            if manager.status().await.unwrap().member_count == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(
        reached.is_ok(),
        "timed out waiting for {n} members, have {}",
        manager.len()
    );
}

/// Wait for an accept task to finish and return its result.
pub async fn join(task: AcceptTask) -> Result<(), HubError> {
    tokio::time::timeout(WAIT_TIMEOUT, task)
        .await
        .expect("accept did not return")
        .expect("accept task panicked")
}
