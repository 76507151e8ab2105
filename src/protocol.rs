//! Typed requests and callbacks exchanged with the relay transport.
//!
//! The session never defines a wire format of its own: these types are the
//! boundary to the external relay. They derive `serde` so transports that
//! need to put them on a wire can do so, and so RPC/event payloads can carry
//! arbitrary JSON values.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;
use crate::error_codes::RoomFailure;

/// Number of view ids reserved per peer. Object ids are `actor * 1000 + n`;
/// ids below 1000 belong to scene objects.
pub const VIEW_IDS_PER_PEER: u32 = 1000;

// ── Identifiers ─────────────────────────────────────────────────────

/// Numeric actor id of a peer inside a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub i32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to a networked object (its view id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef(u32);

impl ObjectRef {
    /// Wrap a raw view id.
    pub const fn new(view_id: u32) -> Self {
        Self(view_id)
    }

    /// The raw view id.
    pub const fn view_id(self) -> u32 {
        self.0
    }

    /// Returns `true` for ids in the scene range (not allocated by a peer).
    pub const fn is_scene_object(self) -> bool {
        self.0 < VIEW_IDS_PER_PEER
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view:{}", self.0)
    }
}

// ── Peers and rooms ─────────────────────────────────────────────────

/// A participant in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Actor id inside the current room.
    pub id: PeerId,
    /// Identity that is stable across rooms.
    pub user_id: Uuid,
    /// Display name.
    pub nick_name: String,
    /// Whether this peer currently acts as master client.
    pub is_master_client: bool,
}

/// Options for creating a room.
///
/// # Example
///
/// ```
/// use relay_session::protocol::RoomOptions;
///
/// let options = RoomOptions::default().with_max_peers(8);
/// assert_eq!(options.max_peers, 8);
/// assert!(options.is_open);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomOptions {
    /// Maximum number of peers; `0` means unlimited.
    pub max_peers: u8,
    /// Whether the room is listed in its lobby.
    pub is_visible: bool,
    /// Whether the room accepts new peers.
    pub is_open: bool,
    /// How long an inactive peer keeps its slot, in milliseconds.
    pub player_ttl_ms: i32,
    /// How long an empty room is kept alive, in milliseconds.
    pub empty_room_ttl_ms: i32,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            max_peers: 0,
            is_visible: true,
            is_open: true,
            player_ttl_ms: 0,
            empty_room_ttl_ms: 0,
        }
    }
}

impl RoomOptions {
    /// Set the maximum number of peers.
    #[must_use]
    pub fn with_max_peers(mut self, max_peers: u8) -> Self {
        self.max_peers = max_peers;
        self
    }

    /// Set whether the room is listed in its lobby.
    #[must_use]
    pub fn with_visible(mut self, is_visible: bool) -> Self {
        self.is_visible = is_visible;
        self
    }

    /// Set whether the room accepts new peers.
    #[must_use]
    pub fn with_open(mut self, is_open: bool) -> Self {
        self.is_open = is_open;
        self
    }

    /// Set the inactive-peer keep-alive.
    #[must_use]
    pub fn with_player_ttl_ms(mut self, ttl: i32) -> Self {
        self.player_ttl_ms = ttl;
        self
    }
}

/// Kind of lobby a room is listed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyKind {
    #[default]
    Default,
    SqlFilter,
    AsyncRandom,
}

/// A named lobby. `LobbyDescriptor::default()` is the relay's default lobby.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LobbyDescriptor {
    pub name: String,
    pub kind: LobbyKind,
}

/// Room state as seen by a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub name: String,
    pub max_peers: u8,
    pub is_open: bool,
    pub is_visible: bool,
}

// ── Client state machine ────────────────────────────────────────────

/// Connection state of the session, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    #[default]
    Disconnected,
    ConnectingToMaster,
    ConnectedToMaster,
    JoiningLobby,
    InLobby,
    JoiningRoom,
    InRoom,
    LeavingRoom,
    Disconnecting,
}

impl ClientState {
    /// Returns `true` if `next` is an expected successor of `self`.
    ///
    /// Staying in the same state and dropping to `Disconnected` are always
    /// allowed.
    pub fn can_transition_to(self, next: ClientState) -> bool {
        use ClientState::*;
        if self == next || next == Disconnected {
            return true;
        }
        match self {
            Disconnected => matches!(next, ConnectingToMaster),
            ConnectingToMaster => matches!(next, ConnectedToMaster | Disconnecting),
            ConnectedToMaster => matches!(next, JoiningLobby | JoiningRoom | Disconnecting),
            JoiningLobby => matches!(next, InLobby | ConnectedToMaster | Disconnecting),
            InLobby => matches!(next, JoiningRoom | ConnectedToMaster | Disconnecting),
            JoiningRoom => matches!(next, InRoom | ConnectedToMaster | InLobby | Disconnecting),
            InRoom => matches!(next, LeavingRoom | Disconnecting),
            LeavingRoom => matches!(next, ConnectingToMaster | ConnectedToMaster | Disconnecting),
            Disconnecting => false,
        }
    }

    /// Returns `true` once the master server connection is established.
    pub fn is_connected(self) -> bool {
        !matches!(
            self,
            ClientState::Disconnected | ClientState::ConnectingToMaster
        )
    }

    /// Returns `true` in states where new operations can be issued.
    pub fn is_ready(self) -> bool {
        matches!(
            self,
            ClientState::ConnectedToMaster | ClientState::InLobby | ClientState::InRoom
        )
    }
}

/// Why the transport disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectCause {
    #[default]
    None,
    /// The local application requested the disconnect.
    ClientLogic,
    /// The relay closed the connection (kick, room closed).
    ServerLogic,
    /// The relay stopped answering.
    ServerTimeout,
    /// The local side stopped receiving acknowledgements.
    ClientTimeout,
    /// The initial connect failed.
    ExceptionOnConnect,
    /// The requested region does not exist.
    InvalidRegion,
    /// The relay reached its concurrent-user limit.
    MaxCcuReached,
    /// The transport failed or the session loop was shut down.
    TransportFailure,
}

// ── Spatial values ──────────────────────────────────────────────────

/// A position in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// A rotation quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ── RPC and events ──────────────────────────────────────────────────

/// Which peers an RPC is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcTarget {
    /// Every peer, including the initiator.
    All,
    /// Every peer except the initiator.
    Others,
    /// Exactly one peer. Never echoed to the initiator.
    Specific(PeerId),
}

/// Which peers a custom event is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiverGroup {
    #[default]
    Others,
    All,
    MasterClient,
}

/// Reliability tier for a custom event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    #[default]
    Reliable,
    Unreliable,
}

/// Addressing options for [`Session::raise_event`](crate::Session::raise_event).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RaiseEventOptions {
    pub receivers: ReceiverGroup,
    /// Interest group; `0` reaches everyone.
    pub interest_group: u8,
}

impl RaiseEventOptions {
    /// Options addressing the given receiver group in interest group 0.
    pub fn to(receivers: ReceiverGroup) -> Self {
        Self {
            receivers,
            interest_group: 0,
        }
    }
}

/// A custom event, inbound or locally delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub code: u8,
    /// Sending peer; `None` for relay-originated events.
    pub sender: Option<PeerId>,
    pub payload: serde_json::Value,
}

/// A remote procedure call on a networked object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcCall {
    pub object: ObjectRef,
    pub method: String,
    /// Invoking peer; filled in by the relay for inbound calls.
    pub sender: Option<PeerId>,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

impl RpcCall {
    /// Deserialize argument `index` into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MalformedPayload`] if the argument is missing
    /// or has the wrong shape.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, SessionError> {
        let value = self.args.get(index).ok_or_else(|| {
            SessionError::MalformedPayload(format!(
                "{}.{}: missing argument {index} (got {})",
                self.object,
                self.method,
                self.args.len()
            ))
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            SessionError::MalformedPayload(format!(
                "{}.{}: argument {index}: {e}",
                self.object, self.method
            ))
        })
    }
}

/// Everything needed to create a networked object on every peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstantiationData {
    pub object: ObjectRef,
    /// Owning peer; `None` for room objects controlled by the master client.
    pub owner: Option<PeerId>,
    pub prefab: String,
    pub position: Vec3,
    pub rotation: Quat,
    pub group: u8,
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

// ── Messages ────────────────────────────────────────────────────────

/// Requests the session hands to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TransportRequest {
    /// Display name to use for the local peer. Always the first request.
    SetNickName { nick_name: String },
    /// Connect using the transport's own settings.
    Connect,
    /// Connect to the master server of a specific region.
    ConnectToRegion { region: String },
    /// Connect to an explicit master server.
    ConnectToMaster {
        address: String,
        port: u16,
        app_id: String,
    },
    /// Ping all regions and connect to the best one.
    ConnectToBestRegion,
    /// Reconnect to the last master server.
    Reconnect,
    /// Reconnect and rejoin the last room.
    ReconnectAndRejoin,
    Disconnect,
    JoinLobby { lobby: Option<LobbyDescriptor> },
    LeaveLobby,
    CreateRoom {
        /// `None` lets the relay pick a name.
        name: Option<String>,
        options: RoomOptions,
        lobby: Option<LobbyDescriptor>,
        #[serde(default)]
        expected_peers: Vec<String>,
    },
    JoinRoom {
        name: String,
        #[serde(default)]
        expected_peers: Vec<String>,
    },
    JoinOrCreateRoom {
        name: String,
        options: RoomOptions,
        lobby: Option<LobbyDescriptor>,
        #[serde(default)]
        expected_peers: Vec<String>,
    },
    JoinRandomRoom,
    LeaveRoom { become_inactive: bool },
    Instantiate(Box<InstantiationData>),
    Destroy { object: ObjectRef },
    DestroyPeerObjects { peer: PeerId },
    DestroyAll,
    /// Deliver an RPC to remote peers. The relay never delivers it back to
    /// the sender.
    InvokeRemote {
        call: RpcCall,
        target: RpcTarget,
        encrypt: bool,
    },
    /// Deliver a custom event to remote peers. The relay never delivers it
    /// back to the sender.
    RaiseEvent {
        code: u8,
        payload: serde_json::Value,
        options: RaiseEventOptions,
        delivery: DeliveryMode,
    },
    SetMasterClient { peer: PeerId },
    CloseConnection { peer: PeerId },
    SetSendRates {
        send_rate: u32,
        serialization_rate: u32,
    },
    /// Flush any batched outgoing commands immediately.
    FlushOutgoing,
}

/// Payload of the [`JoinedRoom`](TransportCallback::JoinedRoom) callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedRoomPayload {
    pub room: RoomInfo,
    /// The local peer as assigned by the relay.
    pub local: Peer,
    /// All members including the local peer.
    pub peers: Vec<Peer>,
}

/// Callbacks the transport delivers to the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TransportCallback {
    /// The transport entered an in-progress state (connecting, joining, leaving).
    StateChanged { state: ClientState },
    ConnectedToMaster,
    Disconnected { cause: DisconnectCause },
    JoinedLobby,
    LeftLobby,
    CreatedRoom,
    CreateRoomFailed(RoomFailure),
    JoinRoomFailed(RoomFailure),
    /// Boxed to reduce enum size.
    JoinedRoom(Box<JoinedRoomPayload>),
    LeftRoom,
    PeerEntered { peer: Peer },
    PeerLeft { peer: Peer },
    MasterClientSwitched { new_master: PeerId },
    Event(EventData),
    Rpc(RpcCall),
    /// A remote peer instantiated an object (boxed to reduce enum size).
    Instantiated(Box<InstantiationData>),
    Destroyed { object: ObjectRef },
    PingUpdated { rtt_ms: u32 },
}
