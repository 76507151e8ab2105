//! Lifecycle notifications as a channel of values.
//!
//! [`Session::subscribe_events`](crate::Session::subscribe_events) installs an
//! [`EventForwarder`] that turns every [`SessionListener`] callback into a
//! [`SessionEvent`] on a bounded channel. This suits code that prefers an
//! `events.recv().await` loop over implementing the listener trait.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::HandlerResult;
use crate::error_codes::RoomFailure;
use crate::listener::SessionListener;
use crate::protocol::{DisconnectCause, InstantiationData, ObjectRef, Peer};
use crate::session::Session;

/// A session lifecycle notification.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ConnectedToMaster,
    Disconnected { cause: DisconnectCause },
    JoinedLobby,
    LeftLobby,
    CreatedRoom,
    CreateRoomFailed(RoomFailure),
    JoinedRoom,
    JoinRoomFailed(RoomFailure),
    LeftRoom,
    PeerEntered(Peer),
    PeerLeft(Peer),
    MasterClientSwitched(Peer),
    ObjectInstantiated(Box<InstantiationData>),
    ObjectDestroyed(ObjectRef),
}

/// A listener that forwards every notification to a bounded channel.
///
/// When the consumer cannot keep up the event is dropped and a warning is
/// logged, so the session loop is never blocked by a slow reader.
#[derive(Debug)]
pub struct EventForwarder {
    tx: mpsc::Sender<SessionEvent>,
}

impl EventForwarder {
    /// Create a forwarder and the receiving end of its channel.
    ///
    /// Capacity values below 1 are clamped to 1.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    fn forward(&self, event: SessionEvent) -> HandlerResult {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("session event channel full, dropping event: {dropped:?}");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("session event channel closed, receiver dropped");
            }
        }
        Ok(())
    }
}

impl SessionListener for EventForwarder {
    fn on_connected_to_master(&self, _session: &Session) -> HandlerResult {
        self.forward(SessionEvent::ConnectedToMaster)
    }

    fn on_disconnected(&self, _session: &Session, cause: DisconnectCause) -> HandlerResult {
        self.forward(SessionEvent::Disconnected { cause })
    }

    fn on_joined_lobby(&self, _session: &Session) -> HandlerResult {
        self.forward(SessionEvent::JoinedLobby)
    }

    fn on_left_lobby(&self, _session: &Session) -> HandlerResult {
        self.forward(SessionEvent::LeftLobby)
    }

    fn on_created_room(&self, _session: &Session) -> HandlerResult {
        self.forward(SessionEvent::CreatedRoom)
    }

    fn on_create_room_failed(&self, _session: &Session, failure: &RoomFailure) -> HandlerResult {
        self.forward(SessionEvent::CreateRoomFailed(failure.clone()))
    }

    fn on_joined_room(&self, _session: &Session) -> HandlerResult {
        self.forward(SessionEvent::JoinedRoom)
    }

    fn on_join_room_failed(&self, _session: &Session, failure: &RoomFailure) -> HandlerResult {
        self.forward(SessionEvent::JoinRoomFailed(failure.clone()))
    }

    fn on_left_room(&self, _session: &Session) -> HandlerResult {
        self.forward(SessionEvent::LeftRoom)
    }

    fn on_peer_entered(&self, _session: &Session, peer: &Peer) -> HandlerResult {
        self.forward(SessionEvent::PeerEntered(peer.clone()))
    }

    fn on_peer_left(&self, _session: &Session, peer: &Peer) -> HandlerResult {
        self.forward(SessionEvent::PeerLeft(peer.clone()))
    }

    fn on_master_client_switched(&self, _session: &Session, new_master: &Peer) -> HandlerResult {
        self.forward(SessionEvent::MasterClientSwitched(new_master.clone()))
    }

    fn on_object_instantiated(
        &self,
        _session: &Session,
        object: &InstantiationData,
    ) -> HandlerResult {
        self.forward(SessionEvent::ObjectInstantiated(Box::new(object.clone())))
    }

    fn on_object_destroyed(&self, _session: &Session, object: ObjectRef) -> HandlerResult {
        self.forward(SessionEvent::ObjectDestroyed(object))
    }
}
