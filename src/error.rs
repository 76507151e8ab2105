//! Error types for the relay session layer.

use thiserror::Error;

use crate::protocol::{ObjectRef, PeerId};

/// Errors returned synchronously by session operations.
///
/// Network outcomes (room full, disconnects, failed joins) are never
/// reported through this type; they arrive as lifecycle notifications.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Failed to hand a request to the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a callback from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The session loop has exited; no further requests can be queued.
    #[error("session has been shut down")]
    ShutDown,

    /// The operation requires room membership.
    #[error("not in a room")]
    NotInRoom,

    /// A caller-side precondition was violated.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument {
        /// Name of the offending argument.
        name: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The object reference does not name a live networked object.
    #[error("unknown networked object {0}")]
    UnknownObject(ObjectRef),

    /// Only the owner of the object may perform this operation.
    #[error("object {object} is not owned by the local peer (owner: {owner:?})")]
    NotOwner {
        /// The object that was addressed.
        object: ObjectRef,
        /// Its current owner, `None` for room objects.
        owner: Option<PeerId>,
    },

    /// The operation is reserved for the master client of the room.
    #[error("operation `{0}` requires the master client")]
    NotMasterClient(&'static str),

    /// An inbound payload did not have the expected shape.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Shorthand for an [`InvalidArgument`](SessionError::InvalidArgument) error.
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }
}

/// A specialized [`Result`] type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Error type returned by subscriber callbacks (listeners, event and RPC handlers).
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type returned by subscriber callbacks.
pub type HandlerResult = std::result::Result<(), HandlerError>;
