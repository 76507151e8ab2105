//! The session façade over a relay transport.
//!
//! [`Session`] is a cheap, cloneable handle. Every operation validates its
//! arguments, queues a typed request for a background loop task and returns
//! immediately; network outcomes come back later as lifecycle notifications
//! delivered to [`SessionListener`]s. The loop is owned by the
//! [`SessionRuntime`] returned from [`Session::start`].
//!
//! # Example
//!
//! ```rust,ignore
//! let runtime = Session::start(transport, SessionConfig::new("Alice"));
//! let session = runtime.session();
//! let mut events = session.subscribe_events(64);
//!
//! session.connect()?;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::ConnectedToMaster => {
//!             session.create_or_join_room("dev-room", RoomOptions::default(), None, &[])?;
//!         }
//!         SessionEvent::JoinedRoom => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SessionError};
use crate::event::{EventForwarder, SessionEvent};
use crate::listener::{ListenerSet, SessionListener};
use crate::lock;
use crate::protocol::{
    ClientState, DeliveryMode, DisconnectCause, EventData, InstantiationData, LobbyDescriptor,
    ObjectRef, Peer, PeerId, Quat, RaiseEventOptions, ReceiverGroup, RoomInfo, RoomOptions,
    RpcCall, RpcTarget, TransportCallback, TransportRequest, Vec3, VIEW_IDS_PER_PEER,
};
use crate::router::{EventHandler, EventRouter};
use crate::rpc::{validate_method, RpcChannel};
use crate::transport::Transport;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`Session`].
///
/// # Example
///
/// ```
/// use relay_session::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::new("Alice").with_shutdown_timeout(Duration::from_secs(5));
/// assert_eq!(config.nick_name, "Alice");
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Display name of the local peer.
    pub nick_name: String,
    /// Timeout for the graceful shutdown.
    ///
    /// When [`SessionRuntime::shutdown`] is called, the loop is given this
    /// much time to close the transport and notify listeners. If the timeout
    /// expires the task is aborted.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl SessionConfig {
    /// Create a new configuration with the given display name.
    pub fn new(nick_name: impl Into<String>) -> Self {
        Self {
            nick_name: nick_name.into(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// Work items for the session loop.
#[derive(Debug)]
enum Command {
    /// Hand a request to the transport.
    Send(TransportRequest),
    /// Run an RPC on the local peer.
    DeliverRpc(RpcCall),
    /// Dispatch a custom event on the local peer.
    DeliverEvent(EventData),
}

/// Connection and room state, written only by the session loop.
#[derive(Debug, Default)]
struct Status {
    state: ClientState,
    in_lobby: bool,
    room: Option<RoomInfo>,
    local_peer: Option<Peer>,
    peers: BTreeMap<PeerId, Peer>,
    ping_ms: u32,
}

impl Status {
    fn local_id(&self) -> Option<PeerId> {
        self.local_peer.as_ref().map(|p| p.id)
    }

    fn is_master_client(&self) -> bool {
        self.local_peer.as_ref().is_some_and(|p| p.is_master_client)
    }
}

#[derive(Debug, Default)]
struct ObjectTable {
    entries: HashMap<ObjectRef, InstantiationData>,
    next_index: u32,
}

impl ObjectTable {
    /// Pick the next free view id in `base * 1000 + 1 ..= base * 1000 + 999`.
    fn allocate(&mut self, base: u32) -> Option<ObjectRef> {
        for _ in 1..VIEW_IDS_PER_PEER {
            self.next_index = self.next_index % (VIEW_IDS_PER_PEER - 1) + 1;
            let candidate =
                ObjectRef::new(base.checked_mul(VIEW_IDS_PER_PEER)?.checked_add(self.next_index)?);
            if !self.entries.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// Scene objects registered through `attach_scene_object` outlive rooms.
    fn is_attached_scene_object(data: &InstantiationData) -> bool {
        data.object.is_scene_object() && data.prefab.is_empty()
    }
}

struct Shared {
    alive: AtomicBool,
    nick_name: String,
    status: Mutex<Status>,
    objects: Mutex<ObjectTable>,
    listeners: ListenerSet,
    router: EventRouter,
    rpc: RpcChannel,
}

// ── Session handle ──────────────────────────────────────────────────

/// Handle to one relay session.
///
/// Cloning is cheap; all clones address the same session. Operations return
/// `Err` only for caller-side precondition violations or when the session
/// loop has shut down.
#[derive(Clone)]
pub struct Session {
    cmd_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl Session {
    /// Start the session loop over `transport`.
    ///
    /// The loop immediately hands a [`SetNickName`](TransportRequest::SetNickName)
    /// request to the transport. Nothing else happens until
    /// [`connect`](Session::connect) is called.
    #[must_use = "dropping the runtime aborts the session loop"]
    pub fn start(transport: impl Transport, config: SessionConfig) -> SessionRuntime {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let shared = Arc::new(Shared {
            alive: AtomicBool::new(true),
            nick_name: config.nick_name.clone(),
            status: Mutex::new(Status::default()),
            objects: Mutex::new(ObjectTable::default()),
            listeners: ListenerSet::default(),
            router: EventRouter::new(),
            rpc: RpcChannel::new(),
        });
        let session = Session { cmd_tx, shared };

        // The channel was just created, so this cannot fail.
        let _ = session.cmd_tx.send(Command::Send(TransportRequest::SetNickName {
            nick_name: config.nick_name,
        }));

        let task = tokio::spawn(session_loop(transport, cmd_rx, session.clone(), shutdown_rx));

        SessionRuntime {
            session,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    // ── Connection ──────────────────────────────────────────────────

    /// Connect using the transport's own settings.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ShutDown`] if the session loop has exited.
    pub fn connect(&self) -> Result<()> {
        self.request(TransportRequest::Connect)
    }

    /// Connect to the master server of `region`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidArgument`] if `region` is empty.
    pub fn connect_to_region(&self, region: impl Into<String>) -> Result<()> {
        let region = non_empty("region", region.into())?;
        self.request(TransportRequest::ConnectToRegion { region })
    }

    /// Connect to an explicit master server.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidArgument`] if `address` or `app_id` is empty.
    pub fn connect_to_master(
        &self,
        address: impl Into<String>,
        port: u16,
        app_id: impl Into<String>,
    ) -> Result<()> {
        let address = non_empty("address", address.into())?;
        let app_id = non_empty("app_id", app_id.into())?;
        self.request(TransportRequest::ConnectToMaster {
            address,
            port,
            app_id,
        })
    }

    /// Let the transport pick the region with the lowest ping.
    pub fn connect_to_best_region(&self) -> Result<()> {
        self.request(TransportRequest::ConnectToBestRegion)
    }

    /// Reconnect to the last master server.
    pub fn reconnect(&self) -> Result<()> {
        self.request(TransportRequest::Reconnect)
    }

    /// Reconnect and rejoin the last room.
    pub fn reconnect_and_rejoin(&self) -> Result<()> {
        self.request(TransportRequest::ReconnectAndRejoin)
    }

    /// Disconnect from the relay. The session itself stays usable.
    pub fn disconnect(&self) -> Result<()> {
        self.request(TransportRequest::Disconnect)
    }

    // ── Lobby and rooms ─────────────────────────────────────────────

    /// Join `lobby`, or the default lobby for `None`.
    pub fn join_lobby(&self, lobby: Option<LobbyDescriptor>) -> Result<()> {
        self.request(TransportRequest::JoinLobby { lobby })
    }

    pub fn leave_lobby(&self) -> Result<()> {
        self.request(TransportRequest::LeaveLobby)
    }

    /// Create a new room. `None` lets the relay choose a name.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidArgument`] if `name` is `Some("")`.
    pub fn create_room(
        &self,
        name: Option<&str>,
        options: RoomOptions,
        lobby: Option<LobbyDescriptor>,
        expected_peers: &[String],
    ) -> Result<()> {
        let name = name.map(|n| non_empty("name", n.to_string())).transpose()?;
        self.request(TransportRequest::CreateRoom {
            name,
            options,
            lobby,
            expected_peers: expected_peers.to_vec(),
        })
    }

    /// Join an existing room by name.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidArgument`] if `name` is empty.
    pub fn join_room(&self, name: &str, expected_peers: &[String]) -> Result<()> {
        let name = non_empty("name", name.to_string())?;
        self.request(TransportRequest::JoinRoom {
            name,
            expected_peers: expected_peers.to_vec(),
        })
    }

    /// Join the named room, creating it with `options` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidArgument`] if `name` is empty.
    pub fn create_or_join_room(
        &self,
        name: &str,
        options: RoomOptions,
        lobby: Option<LobbyDescriptor>,
        expected_peers: &[String],
    ) -> Result<()> {
        let name = non_empty("name", name.to_string())?;
        self.request(TransportRequest::JoinOrCreateRoom {
            name,
            options,
            lobby,
            expected_peers: expected_peers.to_vec(),
        })
    }

    /// Join any open room.
    pub fn join_random_room(&self) -> Result<()> {
        self.request(TransportRequest::JoinRandomRoom)
    }

    /// Leave the current room. With `become_inactive` the relay keeps the
    /// actor slot for a later rejoin.
    pub fn leave_room(&self, become_inactive: bool) -> Result<()> {
        self.request(TransportRequest::LeaveRoom { become_inactive })
    }

    // ── Networked objects ───────────────────────────────────────────

    /// Create a networked object owned by the local peer.
    ///
    /// The object is registered locally right away and announced to the
    /// other peers in the room. Returns its handle.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidArgument`] if `prefab` is empty or the local
    ///   peer has no free view ids left
    /// - [`SessionError::NotInRoom`] outside a room
    pub fn instantiate_networked(
        &self,
        prefab: &str,
        position: Vec3,
        rotation: Quat,
        group: u8,
        data: Option<Vec<serde_json::Value>>,
    ) -> Result<ObjectRef> {
        let prefab = non_empty("prefab", prefab.to_string())?;
        let local = self.local_peer_id().ok_or(SessionError::NotInRoom)?;
        let base = u32::try_from(local.0)
            .map_err(|_| SessionError::invalid("local peer", "actor id must be positive"))?;
        self.instantiate_with(base, Some(local), prefab, position, rotation, group, data)
    }

    /// Create a networked object owned by the room and controlled by the
    /// master client. It survives its creator leaving.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotMasterClient`] if the local peer is not master
    /// - [`SessionError::NotInRoom`] outside a room
    pub fn instantiate_room_object(
        &self,
        prefab: &str,
        position: Vec3,
        rotation: Quat,
        group: u8,
        data: Option<Vec<serde_json::Value>>,
    ) -> Result<ObjectRef> {
        let prefab = non_empty("prefab", prefab.to_string())?;
        if !self.in_room() {
            return Err(SessionError::NotInRoom);
        }
        if !self.is_master_client() {
            return Err(SessionError::NotMasterClient("instantiate_room_object"));
        }
        self.instantiate_with(0, None, prefab, position, rotation, group, data)
    }

    #[allow(clippy::too_many_arguments)]
    fn instantiate_with(
        &self,
        base: u32,
        owner: Option<PeerId>,
        prefab: String,
        position: Vec3,
        rotation: Quat,
        group: u8,
        data: Option<Vec<serde_json::Value>>,
    ) -> Result<ObjectRef> {
        self.ensure_alive()?;
        let instantiation = {
            let mut objects = lock(&self.shared.objects);
            let object = objects
                .allocate(base)
                .ok_or_else(|| SessionError::invalid("prefab", "no free view id left"))?;
            let instantiation = InstantiationData {
                object,
                owner,
                prefab,
                position,
                rotation,
                group,
                data: data.unwrap_or_default(),
            };
            objects.entries.insert(object, instantiation.clone());
            instantiation
        };
        let object = instantiation.object;
        debug!("instantiating {} as {object}", instantiation.prefab);
        self.request(TransportRequest::Instantiate(Box::new(instantiation)))?;
        Ok(object)
    }

    /// Register a scene object (an object that exists on every peer without
    /// being instantiated) so it can send and receive RPCs.
    ///
    /// Scene objects belong to the room and are controlled by the master
    /// client. Registering the same id twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidArgument`] if `view_id` is `0` or not
    /// in the scene range (`1..1000`).
    pub fn attach_scene_object(&self, view_id: u32) -> Result<ObjectRef> {
        if view_id == 0 || view_id >= VIEW_IDS_PER_PEER {
            return Err(SessionError::invalid(
                "view_id",
                format!("scene view ids must be in 1..{VIEW_IDS_PER_PEER}, got {view_id}"),
            ));
        }
        let object = ObjectRef::new(view_id);
        lock(&self.shared.objects)
            .entries
            .entry(object)
            .or_insert_with(|| InstantiationData {
                object,
                owner: None,
                prefab: String::new(),
                position: Vec3::ZERO,
                rotation: Quat::IDENTITY,
                group: 0,
                data: Vec::new(),
            });
        Ok(object)
    }

    /// Destroy a networked object on every peer.
    ///
    /// # Errors
    ///
    /// - [`SessionError::UnknownObject`] if `object` is not live
    /// - [`SessionError::NotOwner`] if the local peer does not control it
    pub fn destroy_networked(&self, object: ObjectRef) -> Result<()> {
        let owner = self
            .object(object)
            .ok_or(SessionError::UnknownObject(object))?
            .owner;
        if !self.is_mine(object) {
            return Err(SessionError::NotOwner { object, owner });
        }
        self.ensure_alive()?;
        self.forget_object(object);
        self.request(TransportRequest::Destroy { object })
    }

    /// Destroy every object owned by `peer`. Allowed for the master client
    /// and for the local peer's own objects.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotMasterClient`] for a foreign peer when the
    /// local peer is not master.
    pub fn destroy_peer_objects(&self, peer: PeerId) -> Result<()> {
        if !self.in_room() {
            return Err(SessionError::NotInRoom);
        }
        if self.local_peer_id() != Some(peer) && !self.is_master_client() {
            return Err(SessionError::NotMasterClient("destroy_peer_objects"));
        }
        self.ensure_alive()?;
        let owned: Vec<ObjectRef> = lock(&self.shared.objects)
            .entries
            .values()
            .filter(|o| o.owner == Some(peer))
            .map(|o| o.object)
            .collect();
        for object in owned {
            self.forget_object(object);
        }
        self.request(TransportRequest::DestroyPeerObjects { peer })
    }

    /// Destroy every networked object in the room. Master client only.
    pub fn destroy_all(&self) -> Result<()> {
        if !self.in_room() {
            return Err(SessionError::NotInRoom);
        }
        if !self.is_master_client() {
            return Err(SessionError::NotMasterClient("destroy_all"));
        }
        self.ensure_alive()?;
        let all: Vec<ObjectRef> = lock(&self.shared.objects)
            .entries
            .values()
            .filter(|o| !ObjectTable::is_attached_scene_object(o))
            .map(|o| o.object)
            .collect();
        for object in all {
            self.forget_object(object);
        }
        self.request(TransportRequest::DestroyAll)
    }

    // ── Room administration ─────────────────────────────────────────

    /// Hand the master client role to `peer`. Master client only.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotMasterClient`] if the local peer is not master
    /// - [`SessionError::InvalidArgument`] if `peer` is not in the room
    pub fn set_master_client(&self, peer: PeerId) -> Result<()> {
        if !self.is_master_client() {
            return Err(SessionError::NotMasterClient("set_master_client"));
        }
        if self.peer(peer).is_none() {
            return Err(SessionError::invalid("peer", format!("{peer} is not in the room")));
        }
        self.request(TransportRequest::SetMasterClient { peer })
    }

    /// Ask the relay to disconnect `peer`. Master client only.
    pub fn close_connection(&self, peer: PeerId) -> Result<()> {
        if !self.is_master_client() {
            return Err(SessionError::NotMasterClient("close_connection"));
        }
        if self.local_peer_id() == Some(peer) {
            return Err(SessionError::invalid("peer", "cannot close the local connection"));
        }
        self.request(TransportRequest::CloseConnection { peer })
    }

    /// Set how often the transport sends and how often object state is serialized, per second.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidArgument`] if either rate is zero.
    pub fn set_send_rates(&self, send_rate: u32, serialization_rate: u32) -> Result<()> {
        if send_rate == 0 || serialization_rate == 0 {
            return Err(SessionError::invalid("send_rate", "rates must be positive"));
        }
        self.request(TransportRequest::SetSendRates {
            send_rate,
            serialization_rate,
        })
    }

    /// Ask the transport to flush batched outgoing commands now.
    pub fn send_all_outgoing(&self) -> Result<()> {
        self.request(TransportRequest::FlushOutgoing)
    }

    // ── RPC ─────────────────────────────────────────────────────────

    /// Invoke `method` on `object` for the peers selected by `target`.
    ///
    /// - [`RpcTarget::All`]: remote peers plus the local peer. The local run
    ///   goes through the session loop, the same path as inbound calls.
    /// - [`RpcTarget::Others`]: remote peers only; never runs locally.
    /// - [`RpcTarget::Specific`]: exactly that peer. If it is the local peer
    ///   the call runs locally only.
    ///
    /// `None` args are sent as an empty argument list.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidArgument`] if `method` is empty
    /// - [`SessionError::UnknownObject`] if `object` is not live
    /// - [`SessionError::NotInRoom`] outside a room
    pub fn rpc(
        &self,
        object: ObjectRef,
        method: &str,
        target: RpcTarget,
        args: Option<Vec<serde_json::Value>>,
    ) -> Result<()> {
        self.rpc_secure(object, method, target, false, args)
    }

    /// Like [`rpc`](Session::rpc), asking the transport to encrypt the call.
    pub fn rpc_secure(
        &self,
        object: ObjectRef,
        method: &str,
        target: RpcTarget,
        encrypt: bool,
        args: Option<Vec<serde_json::Value>>,
    ) -> Result<()> {
        validate_method(method)?;
        if !lock(&self.shared.objects).entries.contains_key(&object) {
            return Err(SessionError::UnknownObject(object));
        }
        let local = self.local_peer_id().ok_or(SessionError::NotInRoom)?;
        let call = RpcCall {
            object,
            method: method.to_string(),
            sender: Some(local),
            args: args.unwrap_or_default(),
        };
        match target {
            RpcTarget::All => {
                self.request(TransportRequest::InvokeRemote {
                    call: call.clone(),
                    target,
                    encrypt,
                })?;
                self.enqueue(Command::DeliverRpc(call))
            }
            RpcTarget::Others => self.request(TransportRequest::InvokeRemote {
                call,
                target,
                encrypt,
            }),
            RpcTarget::Specific(peer) if peer == local => self.enqueue(Command::DeliverRpc(call)),
            RpcTarget::Specific(_) => self.request(TransportRequest::InvokeRemote {
                call,
                target,
                encrypt,
            }),
        }
    }

    /// The table of locally registered RPC methods.
    pub fn rpc_channel(&self) -> &RpcChannel {
        &self.shared.rpc
    }

    // ── Custom events ───────────────────────────────────────────────

    /// Broadcast a custom event.
    ///
    /// [`ReceiverGroup::All`] also dispatches the event locally (through the
    /// session loop); [`ReceiverGroup::MasterClient`] dispatches locally when
    /// the local peer is master and is forwarded otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotInRoom`] outside a room.
    pub fn raise_event(
        &self,
        code: u8,
        payload: serde_json::Value,
        options: RaiseEventOptions,
        delivery: DeliveryMode,
    ) -> Result<()> {
        let local = self.local_peer_id().ok_or(SessionError::NotInRoom)?;
        let local_event = EventData {
            code,
            sender: Some(local),
            payload: payload.clone(),
        };
        let remote = TransportRequest::RaiseEvent {
            code,
            payload,
            options,
            delivery,
        };
        match options.receivers {
            ReceiverGroup::Others => self.request(remote),
            ReceiverGroup::All => {
                self.request(remote)?;
                self.enqueue(Command::DeliverEvent(local_event))
            }
            ReceiverGroup::MasterClient if self.is_master_client() => {
                self.enqueue(Command::DeliverEvent(local_event))
            }
            ReceiverGroup::MasterClient => self.request(remote),
        }
    }

    /// The custom event router.
    pub fn events(&self) -> &EventRouter {
        &self.shared.router
    }

    /// Shorthand for `events().register(code, handler)`.
    pub fn register_event_handler(&self, code: u8, handler: EventHandler) {
        self.shared.router.register(code, handler);
    }

    /// Shorthand for `events().unregister(code, handler)`.
    pub fn unregister_event_handler(&self, code: u8, handler: &EventHandler) -> bool {
        self.shared.router.unregister(code, handler)
    }

    // ── Listeners ───────────────────────────────────────────────────

    /// Register a lifecycle listener. Returns `false` if it is already registered.
    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) -> bool {
        self.shared.listeners.add(listener)
    }

    /// Unregister a lifecycle listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn SessionListener>) -> bool {
        self.shared.listeners.remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }

    /// Receive lifecycle notifications as [`SessionEvent`]s on a bounded channel.
    ///
    /// Events that do not fit are dropped with a warning.
    pub fn subscribe_events(&self, capacity: usize) -> mpsc::Receiver<SessionEvent> {
        let (forwarder, rx) = EventForwarder::channel(capacity);
        self.add_listener(Arc::new(forwarder));
        rx
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Current connection state.
    pub fn state(&self) -> ClientState {
        lock(&self.shared.status).state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn is_connected_and_ready(&self) -> bool {
        self.state().is_ready()
    }

    pub fn in_room(&self) -> bool {
        lock(&self.shared.status).room.is_some()
    }

    pub fn in_lobby(&self) -> bool {
        lock(&self.shared.status).in_lobby
    }

    /// The configured display name of the local peer.
    pub fn nick_name(&self) -> &str {
        &self.shared.nick_name
    }

    /// The local peer, once the relay assigned an actor id in a room.
    pub fn local_peer(&self) -> Option<Peer> {
        lock(&self.shared.status).local_peer.clone()
    }

    pub fn local_peer_id(&self) -> Option<PeerId> {
        lock(&self.shared.status).local_id()
    }

    pub fn current_room(&self) -> Option<RoomInfo> {
        lock(&self.shared.status).room.clone()
    }

    /// All room members, including the local peer, ordered by id.
    pub fn peers(&self) -> Vec<Peer> {
        lock(&self.shared.status).peers.values().cloned().collect()
    }

    pub fn peer(&self, id: PeerId) -> Option<Peer> {
        lock(&self.shared.status).peers.get(&id).cloned()
    }

    pub fn peer_count(&self) -> usize {
        lock(&self.shared.status).peers.len()
    }

    /// Last round-trip time reported by the transport, in milliseconds.
    pub fn ping(&self) -> u32 {
        lock(&self.shared.status).ping_ms
    }

    pub fn is_master_client(&self) -> bool {
        lock(&self.shared.status).is_master_client()
    }

    pub fn master_client(&self) -> Option<Peer> {
        lock(&self.shared.status)
            .peers
            .values()
            .find(|p| p.is_master_client)
            .cloned()
    }

    /// Instantiation record of a live networked object.
    pub fn object(&self, object: ObjectRef) -> Option<InstantiationData> {
        lock(&self.shared.objects).entries.get(&object).cloned()
    }

    /// Number of live networked objects known locally.
    pub fn object_count(&self) -> usize {
        lock(&self.shared.objects).entries.len()
    }

    /// Returns `true` if the local peer controls `object`: it owns it, or the
    /// object belongs to the room and the local peer is master client.
    pub fn is_mine(&self, object: ObjectRef) -> bool {
        let owner = match lock(&self.shared.objects).entries.get(&object) {
            Some(data) => data.owner,
            None => return false,
        };
        let status = lock(&self.shared.status);
        match owner {
            Some(owner) => status.local_id() == Some(owner),
            None => status.is_master_client(),
        }
    }

    /// Returns `false` once the session loop has exited.
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }

    /// Returns `true` if both handles address the same session.
    pub fn ptr_eq(a: &Session, b: &Session) -> bool {
        Arc::ptr_eq(&a.shared, &b.shared)
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn ensure_alive(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(SessionError::ShutDown)
        }
    }

    fn request(&self, request: TransportRequest) -> Result<()> {
        self.enqueue(Command::Send(request))
    }

    /// Queue a command for the session loop.
    fn enqueue(&self, command: Command) -> Result<()> {
        self.ensure_alive()?;
        self.cmd_tx.send(command).map_err(|_| SessionError::ShutDown)
    }

    /// Drop an object and its RPC methods. Returns whether it was known.
    fn forget_object(&self, object: ObjectRef) -> bool {
        let removed = lock(&self.shared.objects).entries.remove(&object).is_some();
        if removed {
            self.shared.rpc.unregister_object(object);
        }
        removed
    }

    fn transition(&self, next: ClientState) {
        let mut status = lock(&self.shared.status);
        let prev = status.state;
        if prev == next {
            return;
        }
        if !prev.can_transition_to(next) {
            warn!("unexpected state transition {prev:?} -> {next:?}");
        }
        debug!("state: {prev:?} -> {next:?}");
        status.state = next;
    }

    /// Forget the room, its peers and every room-scoped object.
    fn clear_room_state(&self) {
        {
            let mut status = lock(&self.shared.status);
            status.room = None;
            status.local_peer = None;
            status.peers.clear();
        }
        let dropped: Vec<ObjectRef> = {
            let mut objects = lock(&self.shared.objects);
            let dropped = objects
                .entries
                .values()
                .filter(|o| !ObjectTable::is_attached_scene_object(o))
                .map(|o| o.object)
                .collect::<Vec<_>>();
            for object in &dropped {
                objects.entries.remove(object);
            }
            objects.next_index = 0;
            dropped
        };
        for object in dropped {
            self.shared.rpc.unregister_object(object);
        }
    }

    fn apply_disconnect(&self, cause: DisconnectCause) {
        self.transition(ClientState::Disconnected);
        lock(&self.shared.status).in_lobby = false;
        self.clear_room_state();
        info!("disconnected: {cause:?}");
        self.shared
            .listeners
            .notify("disconnected", |l| l.on_disconnected(self, cause));
    }

    /// Apply one transport callback, then notify listeners.
    fn handle_callback(&self, callback: TransportCallback) {
        let listeners = &self.shared.listeners;
        match callback {
            TransportCallback::StateChanged { state } => self.transition(state),
            TransportCallback::ConnectedToMaster => {
                self.transition(ClientState::ConnectedToMaster);
                lock(&self.shared.status).in_lobby = false;
                info!("connected to master");
                listeners.notify("connected_to_master", |l| l.on_connected_to_master(self));
            }
            TransportCallback::Disconnected { cause } => self.apply_disconnect(cause),
            TransportCallback::JoinedLobby => {
                self.transition(ClientState::InLobby);
                lock(&self.shared.status).in_lobby = true;
                listeners.notify("joined_lobby", |l| l.on_joined_lobby(self));
            }
            TransportCallback::LeftLobby => {
                lock(&self.shared.status).in_lobby = false;
                self.transition(ClientState::ConnectedToMaster);
                listeners.notify("left_lobby", |l| l.on_left_lobby(self));
            }
            TransportCallback::CreatedRoom => {
                listeners.notify("created_room", |l| l.on_created_room(self));
            }
            TransportCallback::CreateRoomFailed(failure) => {
                info!("create room failed: {failure}");
                lock(&self.shared.status).in_lobby = false;
                self.transition(ClientState::ConnectedToMaster);
                listeners.notify("create_room_failed", |l| {
                    l.on_create_room_failed(self, &failure)
                });
            }
            TransportCallback::JoinRoomFailed(failure) => {
                info!("join room failed: {failure}");
                lock(&self.shared.status).in_lobby = false;
                self.transition(ClientState::ConnectedToMaster);
                listeners.notify("join_room_failed", |l| l.on_join_room_failed(self, &failure));
            }
            TransportCallback::JoinedRoom(payload) => {
                {
                    let mut status = lock(&self.shared.status);
                    status.in_lobby = false;
                    status.peers = payload.peers.iter().map(|p| (p.id, p.clone())).collect();
                    status.peers.insert(payload.local.id, payload.local.clone());
                    status.local_peer = Some(payload.local.clone());
                    status.room = Some(payload.room.clone());
                }
                self.transition(ClientState::InRoom);
                info!(
                    "joined room {} as {} ({} peers)",
                    payload.room.name,
                    payload.local.id,
                    payload.peers.len()
                );
                listeners.notify("joined_room", |l| l.on_joined_room(self));
            }
            TransportCallback::LeftRoom => {
                if self.state() == ClientState::InRoom {
                    self.transition(ClientState::LeavingRoom);
                }
                self.clear_room_state();
                info!("left room");
                listeners.notify("left_room", |l| l.on_left_room(self));
            }
            TransportCallback::PeerEntered { peer } => {
                lock(&self.shared.status).peers.insert(peer.id, peer.clone());
                debug!("peer entered: {} ({})", peer.id, peer.nick_name);
                listeners.notify("peer_entered", |l| l.on_peer_entered(self, &peer));
            }
            TransportCallback::PeerLeft { peer } => {
                lock(&self.shared.status).peers.remove(&peer.id);
                debug!("peer left: {} ({})", peer.id, peer.nick_name);
                let owned: Vec<ObjectRef> = lock(&self.shared.objects)
                    .entries
                    .values()
                    .filter(|o| o.owner == Some(peer.id))
                    .map(|o| o.object)
                    .collect();
                for object in owned {
                    self.forget_object(object);
                    listeners.notify("object_destroyed", |l| l.on_object_destroyed(self, object));
                }
                listeners.notify("peer_left", |l| l.on_peer_left(self, &peer));
            }
            TransportCallback::MasterClientSwitched { new_master } => {
                let master = {
                    let mut status = lock(&self.shared.status);
                    for peer in status.peers.values_mut() {
                        peer.is_master_client = peer.id == new_master;
                    }
                    if let Some(local) = status.local_peer.as_mut() {
                        local.is_master_client = local.id == new_master;
                    }
                    status.peers.get(&new_master).cloned()
                };
                match master {
                    Some(master) => {
                        info!("master client is now {}", master.id);
                        listeners.notify("master_client_switched", |l| {
                            l.on_master_client_switched(self, &master)
                        });
                    }
                    None => warn!("master client switched to unknown peer {new_master}"),
                }
            }
            TransportCallback::Event(event) => {
                self.shared.router.dispatch(&event);
            }
            TransportCallback::Rpc(call) => {
                self.shared.rpc.deliver(&call);
            }
            TransportCallback::Instantiated(data) => {
                lock(&self.shared.objects)
                    .entries
                    .insert(data.object, (*data).clone());
                debug!("remote instantiation of {} as {}", data.prefab, data.object);
                listeners.notify("object_instantiated", |l| {
                    l.on_object_instantiated(self, &data)
                });
            }
            TransportCallback::Destroyed { object } => {
                if self.forget_object(object) {
                    listeners.notify("object_destroyed", |l| l.on_object_destroyed(self, object));
                } else {
                    debug!("destroy for unknown object {object} ignored");
                }
            }
            TransportCallback::PingUpdated { rtt_ms } => {
                lock(&self.shared.status).ping_ms = rtt_ms;
            }
        }
    }

    /// Final notification when the loop exits.
    fn finish(&self, cause: DisconnectCause) {
        self.shared.alive.store(false, Ordering::Release);
        if self.state() != ClientState::Disconnected {
            self.apply_disconnect(cause);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("nick_name", &self.shared.nick_name)
            .field("state", &self.state())
            .field("in_room", &self.in_room())
            .field("alive", &self.is_alive())
            .finish()
    }
}

fn non_empty(name: &'static str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        return Err(SessionError::invalid(name, "must be non-empty"));
    }
    Ok(value)
}

// ── Runtime ─────────────────────────────────────────────────────────

/// Owner of the session loop task.
///
/// Dropping the runtime aborts the loop; call
/// [`shutdown`](SessionRuntime::shutdown) for a graceful stop that closes the
/// transport and notifies listeners.
pub struct SessionRuntime {
    session: Session,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl SessionRuntime {
    /// A handle to the running session.
    pub fn session(&self) -> Session {
        self.session.clone()
    }

    /// Shut down the loop, closing the transport.
    pub async fn shutdown(&mut self) {
        debug!("session shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session loop aborted: {join_err}");
                    }
                }
            }
        }

        self.session.shared.alive.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for SessionRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRuntime")
            .field("session", &self.session)
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for SessionRuntime {
    fn drop(&mut self) {
        // No executor context to drive a graceful close here.
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.session.shared.alive.store(false, Ordering::Release);
    }
}

// ── Session loop ────────────────────────────────────────────────────

/// Background loop multiplexing outgoing commands and inbound callbacks.
///
/// Exits when the shutdown signal fires, the transport closes, or a
/// transport error occurs.
async fn session_loop(
    mut transport: impl Transport,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    session: Session,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("session loop started");

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(request)) => {
                        debug!("sending request: {:?}", std::mem::discriminant(&request));
                        if let Err(e) = transport.send(request).await {
                            error!("transport send error: {e}");
                            session.finish(DisconnectCause::TransportFailure);
                            break;
                        }
                    }
                    Some(Command::DeliverRpc(call)) => {
                        session.shared.rpc.deliver(&call);
                    }
                    Some(Command::DeliverEvent(event)) => {
                        session.shared.router.dispatch(&event);
                    }
                    None => {
                        debug!("command channel closed, shutting down session loop");
                        let _ = transport.close().await;
                        session.finish(DisconnectCause::ClientLogic);
                        break;
                    }
                }
            }

            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                session.finish(DisconnectCause::ClientLogic);
                break;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(callback)) => session.handle_callback(callback),
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        session.finish(DisconnectCause::TransportFailure);
                        break;
                    }
                    None => {
                        debug!("transport closed");
                        session.finish(DisconnectCause::None);
                        break;
                    }
                }
            }
        }
    }

    debug!("session loop exited");
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::rpc::rpc_handler;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;

    // ── Mock transport ──────────────────────────────────────────────

    /// Records requests; callbacks are pushed through the returned sender.
    struct MockTransport {
        incoming: mpsc::UnboundedReceiver<TransportCallback>,
        sent: Arc<StdMutex<Vec<TransportRequest>>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, request: TransportRequest) -> Result<()> {
            self.sent.lock().unwrap().push(request);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<TransportCallback>> {
            self.incoming.recv().await.map(Ok)
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct Harness {
        runtime: SessionRuntime,
        session: Session,
        relay: mpsc::UnboundedSender<TransportCallback>,
        sent: Arc<StdMutex<Vec<TransportRequest>>>,
        events: mpsc::Receiver<SessionEvent>,
    }

    fn start() -> Harness {
        let (relay, incoming) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let transport = MockTransport {
            incoming,
            sent: Arc::clone(&sent),
        };
        let runtime = Session::start(transport, SessionConfig::new("Alice"));
        let session = runtime.session();
        let events = session.subscribe_events(64);
        Harness {
            runtime,
            session,
            relay,
            sent,
            events,
        }
    }

    fn peer(id: i32, name: &str, master: bool) -> Peer {
        Peer {
            id: PeerId(id),
            user_id: Uuid::from_u128(id as u128),
            nick_name: name.into(),
            is_master_client: master,
        }
    }

    fn joined(local: Peer, others: Vec<Peer>) -> TransportCallback {
        let mut peers = others;
        peers.push(local.clone());
        TransportCallback::JoinedRoom(Box::new(crate::protocol::JoinedRoomPayload {
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

    async fn join_as_master(h: &mut Harness) {
        h.relay.send(TransportCallback::ConnectedToMaster).unwrap();
        h.relay.send(joined(peer(1, "Alice", true), vec![])).unwrap();
        assert_eq!(h.events.recv().await, Some(SessionEvent::ConnectedToMaster));
        assert_eq!(h.events.recv().await, Some(SessionEvent::JoinedRoom));
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn start_sends_nick_name_first() {
        let mut h = start();
        h.session.connect().unwrap();
        settle().await;
        {
            let sent = h.sent.lock().unwrap();
            assert_eq!(
                sent[0],
                TransportRequest::SetNickName {
                    nick_name: "Alice".into()
                }
            );
            assert_eq!(sent[1], TransportRequest::Connect);
        }
        h.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn initial_state_is_disconnected_and_follows_callbacks() {
        let mut h = start();
        assert_eq!(h.session.state(), ClientState::Disconnected);

        h.relay
            .send(TransportCallback::StateChanged {
                state: ClientState::ConnectingToMaster,
            })
            .unwrap();
        h.relay.send(TransportCallback::ConnectedToMaster).unwrap();
        assert_eq!(h.events.recv().await, Some(SessionEvent::ConnectedToMaster));
        assert_eq!(h.session.state(), ClientState::ConnectedToMaster);
        assert!(h.session.is_connected_and_ready());

        h.relay.send(TransportCallback::JoinedLobby).unwrap();
        assert_eq!(h.events.recv().await, Some(SessionEvent::JoinedLobby));
        assert!(h.session.in_lobby());
        assert_eq!(h.session.state(), ClientState::InLobby);

        h.relay
            .send(TransportCallback::Disconnected {
                cause: DisconnectCause::ServerTimeout,
            })
            .unwrap();
        assert_eq!(
            h.events.recv().await,
            Some(SessionEvent::Disconnected {
                cause: DisconnectCause::ServerTimeout
            })
        );
        assert_eq!(h.session.state(), ClientState::Disconnected);
        assert!(!h.session.in_lobby());
        assert!(h.session.is_alive(), "a relay disconnect is not fatal");

        h.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn empty_room_name_fails_fast() {
        let mut h = start();
        let result = h
            .session
            .create_or_join_room("  ", RoomOptions::default(), None, &[]);
        assert!(matches!(
            result,
            Err(SessionError::InvalidArgument { name: "name", .. })
        ));
        h.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn operations_fail_after_shutdown() {
        let mut h = start();
        h.runtime.shutdown().await;
        assert!(!h.session.is_alive());
        assert!(matches!(h.session.connect(), Err(SessionError::ShutDown)));
    }

    #[tokio::test]
    async fn instantiate_requires_room_and_allocates_peer_range() {
        let mut h = start();
        assert!(matches!(
            h.session
                .instantiate_networked("Player", Vec3::ZERO, Quat::IDENTITY, 0, None),
            Err(SessionError::NotInRoom)
        ));

        join_as_master(&mut h).await;
        let a = h
            .session
            .instantiate_networked("Player", Vec3::ZERO, Quat::IDENTITY, 0, None)
            .unwrap();
        let b = h
            .session
            .instantiate_networked("Player", Vec3::ZERO, Quat::IDENTITY, 0, None)
            .unwrap();
        assert_eq!(a.view_id(), 1001);
        assert_eq!(b.view_id(), 1002);
        assert!(h.session.is_mine(a));
        h.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn rpc_targets_route_local_and_remote() {
        let mut h = start();
        join_as_master(&mut h).await;
        let object = h
            .session
            .instantiate_networked("Player", Vec3::ZERO, Quat::IDENTITY, 0, None)
            .unwrap();
        let local_runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&local_runs);
        h.session
            .rpc_channel()
            .register(
                object,
                "ping",
                rpc_handler(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();

        h.session.rpc(object, "ping", RpcTarget::Others, None).unwrap();
        h.session.rpc(object, "ping", RpcTarget::All, None).unwrap();
        h.session
            .rpc(object, "ping", RpcTarget::Specific(PeerId(1)), None)
            .unwrap();
        h.session
            .rpc(object, "ping", RpcTarget::Specific(PeerId(2)), Some(vec![json!(1)]))
            .unwrap();
        settle().await;

        assert_eq!(local_runs.load(Ordering::SeqCst), 2, "All + Specific(self)");
        let remote: Vec<RpcTarget> = h
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| match r {
                TransportRequest::InvokeRemote { target, call, .. } => {
                    assert_eq!(call.sender, Some(PeerId(1)));
                    Some(*target)
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            remote,
            vec![RpcTarget::Others, RpcTarget::All, RpcTarget::Specific(PeerId(2))]
        );
        h.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn rpc_validates_object_and_method() {
        let mut h = start();
        join_as_master(&mut h).await;
        let unknown = ObjectRef::new(4242);
        assert!(matches!(
            h.session.rpc(unknown, "ping", RpcTarget::All, None),
            Err(SessionError::UnknownObject(o)) if o == unknown
        ));
        let object = h.session.attach_scene_object(5).unwrap();
        assert!(matches!(
            h.session.rpc(object, "", RpcTarget::All, None),
            Err(SessionError::InvalidArgument { name: "method", .. })
        ));
        h.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn peer_left_destroys_its_objects() {
        let mut h = start();
        join_as_master(&mut h).await;
        let bob = peer(2, "Bob", false);
        h.relay
            .send(TransportCallback::PeerEntered { peer: bob.clone() })
            .unwrap();
        h.relay
            .send(TransportCallback::Instantiated(Box::new(InstantiationData {
                object: ObjectRef::new(2001),
                owner: Some(PeerId(2)),
                prefab: "Player".into(),
                position: Vec3::ZERO,
                rotation: Quat::IDENTITY,
                group: 0,
                data: vec![],
            })))
            .unwrap();
        h.relay
            .send(TransportCallback::PeerLeft { peer: bob.clone() })
            .unwrap();

        assert_eq!(h.events.recv().await, Some(SessionEvent::PeerEntered(bob.clone())));
        assert!(matches!(
            h.events.recv().await,
            Some(SessionEvent::ObjectInstantiated(_))
        ));
        assert_eq!(
            h.events.recv().await,
            Some(SessionEvent::ObjectDestroyed(ObjectRef::new(2001)))
        );
        assert_eq!(h.events.recv().await, Some(SessionEvent::PeerLeft(bob)));
        assert!(h.session.object(ObjectRef::new(2001)).is_none());
        assert_eq!(h.session.peer_count(), 1);
        h.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn left_room_keeps_attached_scene_objects_only() {
        let mut h = start();
        join_as_master(&mut h).await;
        let scene = h.session.attach_scene_object(3).unwrap();
        let player = h
            .session
            .instantiate_networked("Player", Vec3::ZERO, Quat::IDENTITY, 0, None)
            .unwrap();

        h.relay.send(TransportCallback::LeftRoom).unwrap();
        assert_eq!(h.events.recv().await, Some(SessionEvent::LeftRoom));
        assert!(!h.session.in_room());
        assert!(h.session.object(scene).is_some());
        assert!(h.session.object(player).is_none());
        h.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_notifies_disconnect_when_connected() {
        let mut h = start();
        h.relay.send(TransportCallback::ConnectedToMaster).unwrap();
        assert_eq!(h.events.recv().await, Some(SessionEvent::ConnectedToMaster));
        h.runtime.shutdown().await;
        assert_eq!(
            h.events.recv().await,
            Some(SessionEvent::Disconnected {
                cause: DisconnectCause::ClientLogic
            })
        );
    }

    #[tokio::test]
    async fn config_defaults() {
        let config = SessionConfig::new("Alice");
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        let config = config.with_shutdown_timeout(Duration::from_millis(5));
        assert_eq!(config.shutdown_timeout, Duration::from_millis(5));
    }
}
