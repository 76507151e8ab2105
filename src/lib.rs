//! # Relay Session
//!
//! Session coordination for small real-time multiplayer rooms on top of an
//! external relay transport.
//!
//! The relay owns matchmaking, message fan-out and actor ids. This crate
//! wraps it in a typed, async-friendly session and adds the gameplay-facing
//! pieces built on top:
//!
//! - **Session** ([`Session`]): connect, lobby, room and object operations,
//!   lifecycle notifications via [`SessionListener`] or [`SessionEvent`]s
//! - **Custom events** ([`EventRouter`]): code-addressed fan-out
//! - **RPC** ([`RpcChannel`], [`Session::rpc`]): named methods on networked objects
//! - **Authoritative values** ([`AuthoritativeValue`], [`Health`]): owner-driven
//!   replicated integers with depletion callbacks
//! - **Spawning** ([`SpawnArbiter`], [`SlotPool`]): staggered, race-free spawn
//!   slot claims after joining a room
//!
//! Implement [`Transport`] to plug in a relay backend. The default
//! `transport-loopback` feature provides [`LoopbackRelay`], an in-process
//! relay for tests and demos.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use relay_session::{LoopbackRelay, Session, SessionConfig, SessionEvent, RoomOptions};
//!
//! let relay = LoopbackRelay::new();
//! let mut runtime = Session::start(relay.transport(), SessionConfig::new("Alice"));
//! let session = runtime.session();
//! let mut events = session.subscribe_events(64);
//!
//! session.connect()?;
//! while let Some(event) = events.recv().await {
//!     if event == SessionEvent::ConnectedToMaster {
//!         session.create_or_join_room("dev-room", RoomOptions::default(), None, &[])?;
//!     }
//! }
//! runtime.shutdown().await;
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod animator;
pub mod autojoin;
pub mod diagnostics;
pub mod error;
pub mod error_codes;
pub mod event;
pub mod host;
pub mod listener;
pub mod protocol;
pub mod replicated;
pub mod router;
pub mod rpc;
pub mod session;
pub mod spawn;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use animator::{AnimatorSink, AnimatorSync};
pub use autojoin::{AutoJoin, AutoJoinConfig};
pub use diagnostics::PingProbe;
pub use error::{HandlerError, HandlerResult, SessionError};
pub use error_codes::{RoomErrorCode, RoomFailure};
pub use event::{EventForwarder, SessionEvent};
pub use host::SessionHost;
pub use listener::SessionListener;
pub use protocol::{
    ClientState, DeliveryMode, DisconnectCause, EventData, InstantiationData, ObjectRef, Peer,
    PeerId, Quat, RaiseEventOptions, ReceiverGroup, RoomOptions, RpcCall, RpcTarget, Vec3,
};
pub use replicated::{AuthoritativeValue, Health};
pub use router::{event_handler, EventHandler, EventRouter};
pub use rpc::{rpc_handler, RpcChannel, RpcHandler};
pub use session::{Session, SessionConfig, SessionRuntime};
pub use spawn::{OccupantCategory, SlotId, SlotOccupancy, SlotPool, SpawnArbiter, SpawnConfig, SpawnSlot};
pub use transport::Transport;

#[cfg(feature = "transport-loopback")]
pub use transports::{LoopbackRelay, LoopbackTransport};

/// Lock a registry mutex, recovering the data if a previous holder panicked.
///
/// Subscriber callbacks never run while a registry lock is held, so a
/// poisoned lock still guards consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
