//! Failure codes reported by the relay for room operations.
//!
//! These arrive inside [`RoomFailure`] through the
//! `on_create_room_failed` / `on_join_room_failed` notifications. They are
//! ordinary lifecycle outcomes, never returned as `Err` from a session call.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured failure codes for room create/join requests.
///
/// Serialized as `"SCREAMING_SNAKE_CASE"` strings (e.g., `"ROOM_FULL"`).
/// Use [`description()`](RoomErrorCode::description) for a human-readable
/// explanation and [`relay_code()`](RoomErrorCode::relay_code) for the
/// numeric code used by relay servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomErrorCode {
    // Join errors
    RoomFull,
    RoomClosed,
    RoomNotFound,
    NoRandomMatchFound,
    PeerAlreadyJoined,
    UserBlocked,

    // Create errors
    RoomAlreadyExists,
    InvalidRoomName,

    // State errors
    NotConnected,
    AlreadyInRoom,
    OperationNotAllowedInCurrentState,

    // Server errors
    ServerFull,
    InternalError,
}

impl RoomErrorCode {
    /// Returns a human-readable description of this failure code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::RoomFull => "The room has reached its maximum number of peers.",
            Self::RoomClosed => "The room is closed and does not accept new peers.",
            Self::RoomNotFound => "No room with the given name exists.",
            Self::NoRandomMatchFound => "No open room matched the random join request.",
            Self::PeerAlreadyJoined => "A peer with the same user id is already in the room.",
            Self::UserBlocked => "The user is blocked from joining this room.",
            Self::RoomAlreadyExists => "A room with the given name already exists.",
            Self::InvalidRoomName => "The room name is empty or contains invalid characters.",
            Self::NotConnected => "The client is not connected to the master server.",
            Self::AlreadyInRoom => "The client is already a member of a room.",
            Self::OperationNotAllowedInCurrentState => {
                "The operation is not allowed in the current client state."
            }
            Self::ServerFull => "The relay has reached its capacity.",
            Self::InternalError => "The relay reported an internal error.",
        }
    }

    /// Numeric code as used on the relay side.
    pub fn relay_code(&self) -> i16 {
        match self {
            Self::RoomFull => 32765,
            Self::RoomClosed => 32764,
            Self::RoomNotFound => 32758,
            Self::NoRandomMatchFound => 32760,
            Self::PeerAlreadyJoined => 32750,
            Self::UserBlocked => 32761,
            Self::RoomAlreadyExists => 32766,
            Self::InvalidRoomName => -2,
            Self::NotConnected => -3,
            Self::AlreadyInRoom => -3,
            Self::OperationNotAllowedInCurrentState => -3,
            Self::ServerFull => 32762,
            Self::InternalError => -1,
        }
    }

    /// Returns `true` for failures that may succeed when retried later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RoomFull | Self::NoRandomMatchFound | Self::ServerFull
        )
    }
}

impl fmt::Display for RoomErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| format!("{self:?}"));
        f.write_str(&s)
    }
}

/// A failed room create/join as reported by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomFailure {
    /// Structured failure code.
    pub code: RoomErrorCode,
    /// Relay-provided message.
    pub message: String,
}

impl RoomFailure {
    /// Create a failure whose message is the code's default description.
    pub fn new(code: RoomErrorCode) -> Self {
        Self {
            code,
            message: code.description().to_string(),
        }
    }
}

impl fmt::Display for RoomFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.code.relay_code(), self.message)
    }
}
