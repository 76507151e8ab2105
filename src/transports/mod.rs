//! Transport implementations.
//!
//! | Feature              | Transport                          |
//! |----------------------|------------------------------------|
//! | `transport-loopback` | [`LoopbackRelay`] / [`LoopbackTransport`] |
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_session::{LoopbackRelay, Session, SessionConfig};
//!
//! let relay = LoopbackRelay::new();
//! let alice = Session::start(relay.transport(), SessionConfig::new("Alice"));
//! let bob = Session::start(relay.transport(), SessionConfig::new("Bob"));
//! ```

#[cfg(feature = "transport-loopback")]
pub mod loopback;

#[cfg(feature = "transport-loopback")]
pub use loopback::{LoopbackRelay, LoopbackTransport};
