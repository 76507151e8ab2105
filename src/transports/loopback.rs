//! In-process relay implementation.
//!
//! [`LoopbackRelay`] plays the part of the external relay service for any
//! number of sessions in the same process: it tracks connections, rooms,
//! actor ids, master clients and cached instantiations, and fans RPCs and
//! custom events out to room members. Each [`LoopbackTransport`] is one
//! client connection.
//!
//! # Feature gate
//!
//! This module is only available when the `transport-loopback` feature is
//! enabled (it is enabled by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), relay_session::SessionError> {
//! use relay_session::{LoopbackRelay, Session, SessionConfig};
//!
//! let relay = LoopbackRelay::new();
//! let mut alice = Session::start(relay.transport(), SessionConfig::new("Alice"));
//! alice.session().connect()?;
//! alice.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::SessionError;
use crate::error_codes::{RoomErrorCode, RoomFailure};
use crate::lock;
use crate::protocol::{
    ClientState, DisconnectCause, EventData, InstantiationData, JoinedRoomPayload, ObjectRef,
    Peer, PeerId, ReceiverGroup, RoomInfo, RoomOptions, RpcTarget, TransportCallback,
    TransportRequest,
};
use crate::transport::Transport;

/// Round-trip time reported to clients of the loopback relay.
const LOOPBACK_RTT_MS: u32 = 1;

type ClientId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinMode {
    Create,
    Join,
    JoinOrCreate,
}

#[derive(Debug)]
struct Client {
    tx: mpsc::UnboundedSender<TransportCallback>,
    nick_name: String,
    user_id: Uuid,
    connected: bool,
    in_lobby: bool,
    room: Option<(String, PeerId)>,
    last_room: Option<String>,
}

#[derive(Debug)]
struct Room {
    options: RoomOptions,
    members: BTreeMap<PeerId, ClientId>,
    next_actor: i32,
    master: Option<PeerId>,
    objects: BTreeMap<ObjectRef, InstantiationData>,
}

impl Room {
    fn new(options: RoomOptions) -> Self {
        Self {
            options,
            members: BTreeMap::new(),
            next_actor: 1,
            master: None,
            objects: BTreeMap::new(),
        }
    }

    fn info(&self, name: &str) -> RoomInfo {
        RoomInfo {
            name: name.to_string(),
            max_peers: self.options.max_peers,
            is_open: self.options.is_open,
            is_visible: self.options.is_visible,
        }
    }

    /// `max_peers == 0` means unlimited.
    fn is_full(&self) -> bool {
        self.options.max_peers != 0 && self.members.len() >= usize::from(self.options.max_peers)
    }
}

#[derive(Debug, Default)]
struct RelayState {
    next_client: ClientId,
    next_room: u64,
    clients: HashMap<ClientId, Client>,
    rooms: BTreeMap<String, Room>,
}

/// An in-process relay shared by any number of [`LoopbackTransport`]s.
///
/// Cloning is cheap; clones share the same relay.
#[derive(Debug, Clone, Default)]
pub struct LoopbackRelay {
    state: Arc<Mutex<RelayState>>,
}

impl LoopbackRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new client connection to this relay.
    pub fn transport(&self) -> LoopbackTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = lock(&self.state);
        let id = state.next_client;
        state.next_client += 1;
        state.clients.insert(
            id,
            Client {
                tx,
                nick_name: String::new(),
                user_id: Uuid::new_v4(),
                connected: false,
                in_lobby: false,
                room: None,
                last_room: None,
            },
        );
        debug!("loopback client {id} attached");
        LoopbackTransport {
            id,
            relay: self.clone(),
            rx,
            closed: false,
        }
    }

    /// Names of the rooms that currently exist.
    pub fn room_names(&self) -> Vec<String> {
        lock(&self.state).rooms.keys().cloned().collect()
    }

    /// Number of members in `room`, or `None` if it does not exist.
    pub fn room_peer_count(&self, room: &str) -> Option<usize> {
        lock(&self.state).rooms.get(room).map(|r| r.members.len())
    }

    /// Number of cached networked objects in `room`.
    pub fn room_object_count(&self, room: &str) -> Option<usize> {
        lock(&self.state).rooms.get(room).map(|r| r.objects.len())
    }

    /// Number of attached client connections.
    pub fn client_count(&self) -> usize {
        lock(&self.state).clients.len()
    }

    fn handle(&self, id: ClientId, request: TransportRequest) {
        lock(&self.state).handle(id, request);
    }

    fn detach(&self, id: ClientId) {
        let mut state = lock(&self.state);
        state.leave_room(id, false);
        if state.clients.remove(&id).is_some() {
            debug!("loopback client {id} detached");
        }
    }
}

impl RelayState {
    fn emit(&self, id: ClientId, callback: TransportCallback) {
        if let Some(client) = self.clients.get(&id) {
            // A closed receiver means the client is going away; nothing to do.
            let _ = client.tx.send(callback);
        }
    }

    fn peer(&self, room: &Room, actor: PeerId) -> Option<Peer> {
        let client = self.clients.get(room.members.get(&actor)?)?;
        Some(Peer {
            id: actor,
            user_id: client.user_id,
            nick_name: client.nick_name.clone(),
            is_master_client: room.master == Some(actor),
        })
    }

    /// Room name and actor id of a client that is in a room.
    fn membership(&self, id: ClientId) -> Option<(String, PeerId)> {
        self.clients.get(&id)?.room.clone()
    }

    /// Client ids of `room` members other than `except`.
    fn others(&self, room: &str, except: PeerId) -> Vec<ClientId> {
        self.rooms
            .get(room)
            .map(|r| {
                r.members
                    .iter()
                    .filter(|(actor, _)| **actor != except)
                    .map(|(_, client)| *client)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn handle(&mut self, id: ClientId, request: TransportRequest) {
        trace!("loopback client {id}: {request:?}");
        match request {
            TransportRequest::SetNickName { nick_name } => {
                if let Some(client) = self.clients.get_mut(&id) {
                    client.nick_name = nick_name;
                }
            }
            TransportRequest::Connect
            | TransportRequest::ConnectToRegion { .. }
            | TransportRequest::ConnectToMaster { .. }
            | TransportRequest::ConnectToBestRegion
            | TransportRequest::Reconnect => self.connect(id),
            TransportRequest::ReconnectAndRejoin => {
                self.connect(id);
                let last = self.clients.get(&id).and_then(|c| c.last_room.clone());
                if let Some(name) = last {
                    self.enter_room(id, name, None, JoinMode::Join);
                }
            }
            TransportRequest::Disconnect => self.disconnect(id, DisconnectCause::ClientLogic),
            TransportRequest::JoinLobby { .. } => self.join_lobby(id),
            TransportRequest::LeaveLobby => {
                let was_in_lobby = self
                    .clients
                    .get_mut(&id)
                    .map(|c| std::mem::replace(&mut c.in_lobby, false))
                    .unwrap_or(false);
                if was_in_lobby {
                    self.emit(id, TransportCallback::LeftLobby);
                }
            }
            TransportRequest::CreateRoom { name, options, .. } => {
                let name = name.unwrap_or_else(|| {
                    self.next_room += 1;
                    format!("room-{}", self.next_room)
                });
                self.enter_room(id, name, Some(options), JoinMode::Create);
            }
            TransportRequest::JoinRoom { name, .. } => {
                self.enter_room(id, name, None, JoinMode::Join);
            }
            TransportRequest::JoinOrCreateRoom { name, options, .. } => {
                self.enter_room(id, name, Some(options), JoinMode::JoinOrCreate);
            }
            TransportRequest::JoinRandomRoom => self.join_random(id),
            TransportRequest::LeaveRoom { .. } => self.leave_room(id, true),
            TransportRequest::Instantiate(data) => self.instantiate(id, *data),
            TransportRequest::Destroy { object } => {
                self.destroy_where(id, |o| o.object == object);
            }
            TransportRequest::DestroyPeerObjects { peer } => {
                self.destroy_where(id, |o| o.owner == Some(peer));
            }
            TransportRequest::DestroyAll => {
                self.destroy_where(id, |_| true);
            }
            TransportRequest::InvokeRemote { mut call, target, .. } => {
                let Some((room, actor)) = self.membership(id) else {
                    debug!("rpc from client {id} outside a room dropped");
                    return;
                };
                call.sender = Some(actor);
                let recipients = match target {
                    RpcTarget::All | RpcTarget::Others => self.others(&room, actor),
                    RpcTarget::Specific(peer) if peer == actor => Vec::new(),
                    RpcTarget::Specific(peer) => self
                        .rooms
                        .get(&room)
                        .and_then(|r| r.members.get(&peer))
                        .copied()
                        .into_iter()
                        .collect(),
                };
                for recipient in recipients {
                    self.emit(recipient, TransportCallback::Rpc(call.clone()));
                }
            }
            TransportRequest::RaiseEvent {
                code,
                payload,
                options,
                ..
            } => {
                let Some((room, actor)) = self.membership(id) else {
                    debug!("event from client {id} outside a room dropped");
                    return;
                };
                let recipients = match options.receivers {
                    ReceiverGroup::All | ReceiverGroup::Others => self.others(&room, actor),
                    ReceiverGroup::MasterClient => self
                        .rooms
                        .get(&room)
                        .and_then(|r| r.master.filter(|m| *m != actor))
                        .and_then(|m| self.rooms.get(&room)?.members.get(&m).copied())
                        .into_iter()
                        .collect(),
                };
                let event = EventData {
                    code,
                    sender: Some(actor),
                    payload,
                };
                for recipient in recipients {
                    self.emit(recipient, TransportCallback::Event(event.clone()));
                }
            }
            TransportRequest::SetMasterClient { peer } => self.set_master(id, peer),
            TransportRequest::CloseConnection { peer } => self.kick(id, peer),
            TransportRequest::SetSendRates { .. } | TransportRequest::FlushOutgoing => {}
        }
    }

    fn connect(&mut self, id: ClientId) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        if client.connected {
            debug!("loopback client {id} already connected");
            return;
        }
        client.connected = true;
        self.emit(
            id,
            TransportCallback::StateChanged {
                state: ClientState::ConnectingToMaster,
            },
        );
        self.emit(id, TransportCallback::ConnectedToMaster);
        self.emit(
            id,
            TransportCallback::PingUpdated {
                rtt_ms: LOOPBACK_RTT_MS,
            },
        );
    }

    fn disconnect(&mut self, id: ClientId, cause: DisconnectCause) {
        let connected = self.clients.get(&id).is_some_and(|c| c.connected);
        if !connected {
            return;
        }
        self.leave_room(id, false);
        if let Some(client) = self.clients.get_mut(&id) {
            client.connected = false;
            client.in_lobby = false;
        }
        self.emit(
            id,
            TransportCallback::StateChanged {
                state: ClientState::Disconnecting,
            },
        );
        self.emit(id, TransportCallback::Disconnected { cause });
    }

    fn join_lobby(&mut self, id: ClientId) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        if !client.connected || client.room.is_some() || client.in_lobby {
            debug!("loopback client {id} cannot join a lobby now");
            return;
        }
        client.in_lobby = true;
        self.emit(
            id,
            TransportCallback::StateChanged {
                state: ClientState::JoiningLobby,
            },
        );
        self.emit(id, TransportCallback::JoinedLobby);
    }

    fn fail(&self, id: ClientId, mode: JoinMode, code: RoomErrorCode) {
        let failure = RoomFailure::new(code);
        debug!("loopback client {id}: room request failed: {failure}");
        let callback = match mode {
            JoinMode::Create => TransportCallback::CreateRoomFailed(failure),
            JoinMode::Join | JoinMode::JoinOrCreate => TransportCallback::JoinRoomFailed(failure),
        };
        self.emit(id, callback);
    }

    fn enter_room(
        &mut self,
        id: ClientId,
        name: String,
        options: Option<RoomOptions>,
        mode: JoinMode,
    ) {
        let Some(client) = self.clients.get(&id) else {
            return;
        };
        if !client.connected {
            self.fail(id, mode, RoomErrorCode::NotConnected);
            return;
        }
        if client.room.is_some() {
            self.fail(id, mode, RoomErrorCode::AlreadyInRoom);
            return;
        }
        if name.trim().is_empty() {
            self.fail(id, mode, RoomErrorCode::InvalidRoomName);
            return;
        }

        self.emit(
            id,
            TransportCallback::StateChanged {
                state: ClientState::JoiningRoom,
            },
        );

        let exists = self.rooms.contains_key(&name);
        let created = match (mode, exists) {
            (JoinMode::Create, true) => {
                self.fail(id, mode, RoomErrorCode::RoomAlreadyExists);
                return;
            }
            (JoinMode::Join, false) => {
                self.fail(id, mode, RoomErrorCode::RoomNotFound);
                return;
            }
            (JoinMode::Create | JoinMode::JoinOrCreate, false) => {
                self.rooms
                    .insert(name.clone(), Room::new(options.unwrap_or_default()));
                true
            }
            (JoinMode::Join | JoinMode::JoinOrCreate, true) => false,
        };

        let Some(room) = self.rooms.get_mut(&name) else {
            return;
        };
        let refused = if !room.options.is_open {
            Some(RoomErrorCode::RoomClosed)
        } else if room.is_full() {
            Some(RoomErrorCode::RoomFull)
        } else {
            None
        };
        if let Some(code) = refused {
            if created {
                self.rooms.remove(&name);
            }
            self.fail(id, mode, code);
            return;
        }

        let actor = PeerId(room.next_actor);
        room.next_actor += 1;
        room.members.insert(actor, id);
        if room.master.is_none() {
            room.master = Some(actor);
        }
        if let Some(client) = self.clients.get_mut(&id) {
            client.room = Some((name.clone(), actor));
            client.last_room = Some(name.clone());
            client.in_lobby = false;
        }

        let Some(room) = self.rooms.get(&name) else {
            return;
        };
        let Some(local) = self.peer(room, actor) else {
            return;
        };
        let peers: Vec<Peer> = room
            .members
            .keys()
            .filter_map(|member| self.peer(room, *member))
            .collect();
        let info = room.info(&name);
        let cached: Vec<InstantiationData> = room.objects.values().cloned().collect();
        debug!(
            "loopback client {id} joined {name} as {actor} ({} members)",
            peers.len()
        );

        if created {
            self.emit(id, TransportCallback::CreatedRoom);
        }
        self.emit(
            id,
            TransportCallback::JoinedRoom(Box::new(JoinedRoomPayload {
                room: info,
                local: local.clone(),
                peers,
            })),
        );
        for data in cached {
            self.emit(id, TransportCallback::Instantiated(Box::new(data)));
        }
        for other in self.others(&name, actor) {
            self.emit(
                other,
                TransportCallback::PeerEntered {
                    peer: local.clone(),
                },
            );
        }
    }

    fn join_random(&mut self, id: ClientId) {
        let candidate = self
            .rooms
            .iter()
            .find(|(_, room)| room.options.is_open && room.options.is_visible && !room.is_full())
            .map(|(name, _)| name.clone());
        match candidate {
            Some(name) => self.enter_room(id, name, None, JoinMode::Join),
            None => {
                let connected = self.clients.get(&id).is_some_and(|c| c.connected);
                let code = if connected {
                    RoomErrorCode::NoRandomMatchFound
                } else {
                    RoomErrorCode::NotConnected
                };
                self.fail(id, JoinMode::Join, code);
            }
        }
    }

    /// Remove `id` from its room. Other members see it leave; the leaver
    /// only hears about it when `notify_self` is set.
    fn leave_room(&mut self, id: ClientId, notify_self: bool) {
        let Some((name, actor)) = self.clients.get_mut(&id).and_then(|c| c.room.take()) else {
            return;
        };
        let Some(room) = self.rooms.get(&name) else {
            return;
        };
        let leaver = self.peer(room, actor);

        let (remaining, new_master) = {
            let Some(room) = self.rooms.get_mut(&name) else {
                return;
            };
            room.members.remove(&actor);
            room.objects.retain(|_, o| o.owner != Some(actor));
            let mut new_master = None;
            if room.master == Some(actor) {
                room.master = room.members.keys().next().copied();
                new_master = room.master;
            }
            (room.members.len(), new_master)
        };

        if remaining == 0 {
            debug!("loopback room {name} closed");
            self.rooms.remove(&name);
        } else {
            let others = self.others(&name, actor);
            for other in &others {
                if let Some(peer) = leaver.clone() {
                    self.emit(*other, TransportCallback::PeerLeft { peer });
                }
                if let Some(new_master) = new_master {
                    self.emit(*other, TransportCallback::MasterClientSwitched { new_master });
                }
            }
        }

        if notify_self {
            self.emit(
                id,
                TransportCallback::StateChanged {
                    state: ClientState::LeavingRoom,
                },
            );
            self.emit(id, TransportCallback::LeftRoom);
            self.emit(id, TransportCallback::ConnectedToMaster);
        }
    }

    fn instantiate(&mut self, id: ClientId, data: InstantiationData) {
        let Some((name, actor)) = self.membership(id) else {
            debug!("instantiate from client {id} outside a room dropped");
            return;
        };
        if let Some(room) = self.rooms.get_mut(&name) {
            room.objects.insert(data.object, data.clone());
        }
        for other in self.others(&name, actor) {
            self.emit(other, TransportCallback::Instantiated(Box::new(data.clone())));
        }
    }

    fn destroy_where<F>(&mut self, id: ClientId, mut matches: F)
    where
        F: FnMut(&InstantiationData) -> bool,
    {
        let Some((name, actor)) = self.membership(id) else {
            return;
        };
        let destroyed: Vec<ObjectRef> = match self.rooms.get_mut(&name) {
            Some(room) => {
                let doomed: Vec<ObjectRef> = room
                    .objects
                    .values()
                    .filter(|o| matches(o))
                    .map(|o| o.object)
                    .collect();
                for object in &doomed {
                    room.objects.remove(object);
                }
                doomed
            }
            None => return,
        };
        for other in self.others(&name, actor) {
            for object in &destroyed {
                self.emit(other, TransportCallback::Destroyed { object: *object });
            }
        }
    }

    fn set_master(&mut self, id: ClientId, peer: PeerId) {
        let Some((name, actor)) = self.membership(id) else {
            return;
        };
        let Some(room) = self.rooms.get_mut(&name) else {
            return;
        };
        if room.master != Some(actor) || !room.members.contains_key(&peer) {
            debug!("loopback client {id}: set master to {peer} refused");
            return;
        }
        room.master = Some(peer);
        let members: Vec<ClientId> = room.members.values().copied().collect();
        for member in members {
            self.emit(member, TransportCallback::MasterClientSwitched { new_master: peer });
        }
    }

    fn kick(&mut self, id: ClientId, peer: PeerId) {
        let Some((name, actor)) = self.membership(id) else {
            return;
        };
        let target = match self.rooms.get(&name) {
            Some(room) if room.master == Some(actor) && peer != actor => {
                room.members.get(&peer).copied()
            }
            _ => None,
        };
        match target {
            Some(target) => self.disconnect(target, DisconnectCause::ServerLogic),
            None => debug!("loopback client {id}: close connection of {peer} refused"),
        }
    }
}

/// One client connection to a [`LoopbackRelay`].
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) only awaits an unbounded channel and is
/// cancel-safe.
#[derive(Debug)]
pub struct LoopbackTransport {
    id: ClientId,
    relay: LoopbackRelay,
    rx: mpsc::UnboundedReceiver<TransportCallback>,
    closed: bool,
}

impl LoopbackTransport {
    /// The relay this transport is attached to.
    pub fn relay(&self) -> &LoopbackRelay {
        &self.relay
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, request: TransportRequest) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::TransportClosed);
        }
        self.relay.handle(self.id, request);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<TransportCallback, SessionError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if !self.closed {
            self.closed = true;
            self.relay.detach(self.id);
        }
        Ok(())
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        if !self.closed {
            self.relay.detach(self.id);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    async fn send(t: &mut LoopbackTransport, request: TransportRequest) {
        t.send(request).await.unwrap();
    }

    fn drain(t: &mut LoopbackTransport) -> Vec<TransportCallback> {
        let mut out = Vec::new();
        while let Ok(cb) = t.rx.try_recv() {
            out.push(cb);
        }
        out
    }

    async fn connected(relay: &LoopbackRelay, nick: &str) -> LoopbackTransport {
        let mut t = relay.transport();
        send(
            &mut t,
            TransportRequest::SetNickName {
                nick_name: nick.into(),
            },
        )
        .await;
        send(&mut t, TransportRequest::Connect).await;
        drain(&mut t);
        t
    }

    fn join_or_create(name: &str, max_peers: u8) -> TransportRequest {
        TransportRequest::JoinOrCreateRoom {
            name: name.into(),
            options: RoomOptions::default().with_max_peers(max_peers),
            lobby: None,
            expected_peers: vec![],
        }
    }

    #[tokio::test]
    async fn connect_emits_state_then_connected() {
        let relay = LoopbackRelay::new();
        let mut t = relay.transport();
        send(&mut t, TransportRequest::Connect).await;
        let callbacks = drain(&mut t);
        assert_eq!(
            callbacks.first(),
            Some(&TransportCallback::StateChanged {
                state: ClientState::ConnectingToMaster
            })
        );
        assert!(callbacks.contains(&TransportCallback::ConnectedToMaster));
    }

    #[tokio::test]
    async fn first_member_creates_room_and_becomes_master() {
        let relay = LoopbackRelay::new();
        let mut alice = connected(&relay, "Alice").await;
        send(&mut alice, join_or_create("dev-room", 8)).await;

        let callbacks = drain(&mut alice);
        assert!(callbacks.contains(&TransportCallback::CreatedRoom));
        let joined = callbacks
            .iter()
            .find_map(|cb| match cb {
                TransportCallback::JoinedRoom(p) => Some(p.clone()),
                _ => None,
            })
            .expect("joined");
        assert_eq!(joined.local.id, PeerId(1));
        assert!(joined.local.is_master_client);
        assert_eq!(joined.local.nick_name, "Alice");
        assert_eq!(relay.room_peer_count("dev-room"), Some(1));
    }

    #[tokio::test]
    async fn full_room_rejects_join() {
        let relay = LoopbackRelay::new();
        let mut alice = connected(&relay, "Alice").await;
        let mut bob = connected(&relay, "Bob").await;
        send(&mut alice, join_or_create("duo", 1)).await;
        send(&mut bob, join_or_create("duo", 1)).await;

        let callbacks = drain(&mut bob);
        assert!(callbacks.iter().any(|cb| matches!(
            cb,
            TransportCallback::JoinRoomFailed(f) if f.code == RoomErrorCode::RoomFull
        )));
    }

    #[tokio::test]
    async fn creating_a_closed_room_leaves_nothing_behind() {
        let relay = LoopbackRelay::new();
        let mut alice = connected(&relay, "Alice").await;
        for request in [
            TransportRequest::JoinOrCreateRoom {
                name: "shut".into(),
                options: RoomOptions::default().with_open(false),
                lobby: None,
                expected_peers: vec![],
            },
            TransportRequest::CreateRoom {
                name: Some("shut".into()),
                options: RoomOptions::default().with_open(false),
                lobby: None,
                expected_peers: vec![],
            },
        ] {
            send(&mut alice, request).await;
            let callbacks = drain(&mut alice);
            assert!(callbacks.iter().any(|cb| matches!(
                cb,
                TransportCallback::JoinRoomFailed(f) | TransportCallback::CreateRoomFailed(f)
                    if f.code == RoomErrorCode::RoomClosed
            )));
            assert!(!callbacks.contains(&TransportCallback::CreatedRoom));
            assert!(relay.room_names().is_empty());
            assert_eq!(relay.room_peer_count("shut"), None);
        }
    }

    #[tokio::test]
    async fn join_unknown_room_fails() {
        let relay = LoopbackRelay::new();
        let mut alice = connected(&relay, "Alice").await;
        send(
            &mut alice,
            TransportRequest::JoinRoom {
                name: "nowhere".into(),
                expected_peers: vec![],
            },
        )
        .await;
        assert!(drain(&mut alice).iter().any(|cb| matches!(
            cb,
            TransportCallback::JoinRoomFailed(f) if f.code == RoomErrorCode::RoomNotFound
        )));
    }

    #[tokio::test]
    async fn room_requests_require_connection() {
        let relay = LoopbackRelay::new();
        let mut t = relay.transport();
        send(&mut t, join_or_create("dev-room", 8)).await;
        assert!(drain(&mut t).iter().any(|cb| matches!(
            cb,
            TransportCallback::JoinRoomFailed(f) if f.code == RoomErrorCode::NotConnected
        )));
    }

    #[tokio::test]
    async fn master_leaving_promotes_lowest_actor() {
        let relay = LoopbackRelay::new();
        let mut alice = connected(&relay, "Alice").await;
        let mut bob = connected(&relay, "Bob").await;
        send(&mut alice, join_or_create("dev-room", 8)).await;
        send(&mut bob, join_or_create("dev-room", 8)).await;
        drain(&mut bob);

        send(
            &mut alice,
            TransportRequest::LeaveRoom {
                become_inactive: false,
            },
        )
        .await;
        let callbacks = drain(&mut bob);
        assert!(callbacks
            .iter()
            .any(|cb| matches!(cb, TransportCallback::PeerLeft { peer } if peer.id == PeerId(1))));
        assert!(callbacks.contains(&TransportCallback::MasterClientSwitched {
            new_master: PeerId(2)
        }));
    }

    #[tokio::test]
    async fn close_detaches_and_ends_recv() {
        let relay = LoopbackRelay::new();
        let mut t = connected(&relay, "Alice").await;
        assert_eq!(relay.client_count(), 1);
        t.close().await.unwrap();
        assert_eq!(relay.client_count(), 0);
        assert!(t.recv().await.is_none());
        assert!(matches!(
            t.send(TransportRequest::Connect).await,
            Err(SessionError::TransportClosed)
        ));
    }
}
