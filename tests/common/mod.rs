#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for relay session integration tests.
//!
//! Provides a scripted [`MockTransport`] and helpers for building common
//! relay callbacks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use relay_session::protocol::{
    InstantiationData, JoinedRoomPayload, ObjectRef, Peer, PeerId, Quat, RoomInfo,
    TransportCallback, TransportRequest, Vec3,
};
use relay_session::{Session, SessionConfig, SessionError, SessionEvent, SessionRuntime, Transport};
use tokio::sync::mpsc;

// ── MockTransport ───────────────────────────────────────────────────

/// A scripted mock transport for integration testing.
///
/// Scripted relay callbacks are consumed in order by `recv()`. Once the
/// script is exhausted, callbacks pushed through the injector handle are
/// delivered. All requests sent by the session are recorded in `sent`.
pub struct MockTransport {
    /// Scripted relay callbacks (consumed in order by `recv`).
    incoming: VecDeque<Option<Result<TransportCallback, SessionError>>>,
    /// Callbacks pushed by the test after start.
    injected: mpsc::UnboundedReceiver<TransportCallback>,
    /// Recorded outgoing requests.
    pub sent: Arc<StdMutex<Vec<TransportRequest>>>,
    /// Whether `close()` has been called.
    pub closed: Arc<AtomicBool>,
}

/// Handles for inspecting and driving a [`MockTransport`].
pub struct MockHandles {
    pub sent: Arc<StdMutex<Vec<TransportRequest>>>,
    pub closed: Arc<AtomicBool>,
    pub inject: mpsc::UnboundedSender<TransportCallback>,
}

impl MockHandles {
    /// Push a callback as if the relay had sent it.
    pub fn push(&self, callback: TransportCallback) {
        self.inject.send(callback).expect("mock transport dropped");
    }

    /// Snapshot of every request sent so far.
    pub fn sent(&self) -> Vec<TransportRequest> {
        self.sent.lock().unwrap().clone()
    }

    /// Sent `InvokeRemote` requests for `method`.
    pub fn invocations(&self, method: &str) -> Vec<TransportRequest> {
        self.sent()
            .into_iter()
            .filter(|r| matches!(r, TransportRequest::InvokeRemote { call, .. } if call.method == method))
            .collect()
    }

    /// Sent `Instantiate` requests.
    pub fn instantiations(&self) -> Vec<InstantiationData> {
        self.sent()
            .into_iter()
            .filter_map(|r| match r {
                TransportRequest::Instantiate(data) => Some(*data),
                _ => None,
            })
            .collect()
    }
}

impl MockTransport {
    /// Create a new mock transport with the given scripted callbacks.
    pub fn new(incoming: Vec<Option<Result<TransportCallback, SessionError>>>) -> (Self, MockHandles) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (inject, injected) = mpsc::unbounded_channel();
        let transport = Self {
            incoming: VecDeque::from(incoming),
            injected,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (
            transport,
            MockHandles {
                sent,
                closed,
                inject,
            },
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, request: TransportRequest) -> Result<(), SessionError> {
        self.sent.lock().unwrap().push(request);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<TransportCallback, SessionError>> {
        if let Some(item) = self.incoming.pop_front() {
            return item;
        }
        match self.injected.recv().await {
            Some(callback) => Some(Ok(callback)),
            // Injector dropped: hang so the loop stays alive until shutdown.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── Session helpers ─────────────────────────────────────────────────

/// A started session over a [`MockTransport`].
pub struct Harness {
    pub runtime: SessionRuntime,
    pub session: Session,
    pub events: mpsc::Receiver<SessionEvent>,
    pub mock: MockHandles,
}

/// Start a session named "Alice" with the given scripted callbacks.
pub fn start(incoming: Vec<Option<Result<TransportCallback, SessionError>>>) -> Harness {
    let (transport, mock) = MockTransport::new(incoming);
    let runtime = Session::start(transport, SessionConfig::new("Alice"));
    let session = runtime.session();
    let events = session.subscribe_events(256);
    Harness {
        runtime,
        session,
        events,
        mock,
    }
}

/// Start a session that is already in "dev-room" as actor 1 (master).
pub async fn start_in_room() -> Harness {
    let mut h = start(vec![
        Some(Ok(TransportCallback::ConnectedToMaster)),
        Some(Ok(joined_room(peer(1, "Alice", true), vec![]))),
    ]);
    wait_for(&mut h.events, |e| *e == SessionEvent::JoinedRoom).await;
    h
}

/// Receive events until one matches `pred`; panics after 2 seconds.
pub async fn wait_for<F>(events: &mut mpsc::Receiver<SessionEvent>, pred: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll `cond` until it holds; panics after 2 seconds.
pub async fn eventually<F>(cond: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Give the session loop time to drain its queue.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ── Callback builders ───────────────────────────────────────────────

pub fn peer(id: i32, name: &str, master: bool) -> Peer {
    Peer {
        id: PeerId(id),
        user_id: uuid::Uuid::from_u128(id.unsigned_abs().into()),
        nick_name: name.into(),
        is_master_client: master,
    }
}

/// `JoinedRoom` for "dev-room" with `local` and `others` as members.
pub fn joined_room(local: Peer, others: Vec<Peer>) -> TransportCallback {
    let mut peers = others;
    peers.push(local.clone());
    TransportCallback::JoinedRoom(Box::new(JoinedRoomPayload {
        room: RoomInfo {
            name: "dev-room".into(),
            max_peers: 8,
            is_open: true,
            is_visible: true,
        },
        local,
        peers,
    }))
}

/// `Instantiated` for a "Player" object owned by `owner`.
pub fn instantiated(view_id: u32, owner: i32) -> TransportCallback {
    TransportCallback::Instantiated(Box::new(InstantiationData {
        object: ObjectRef::new(view_id),
        owner: Some(PeerId(owner)),
        prefab: "Player".into(),
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        group: 0,
        data: vec![],
    }))
}
