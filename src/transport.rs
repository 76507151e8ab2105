//! Transport abstraction for the external relay.
//!
//! The [`Transport`] trait is the boundary to whatever relay/room service
//! actually moves bytes: it accepts typed [`TransportRequest`]s and yields
//! typed [`TransportCallback`]s. Connection handling, room discovery,
//! reliability tiers and message delivery all live behind it.
//!
//! # Relay contract
//!
//! - Callbacks are yielded in the order the relay emits them.
//! - RPCs and events from one sender are delivered to each receiver in the
//!   order they were sent.
//! - A sender is never among the recipients of its own
//!   [`InvokeRemote`](TransportRequest::InvokeRemote) or
//!   [`RaiseEvent`](TransportRequest::RaiseEvent); local delivery is the
//!   session's job.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use relay_session::error::SessionError;
//! use relay_session::protocol::{TransportCallback, TransportRequest};
//! use relay_session::transport::Transport;
//!
//! struct MyRelay { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyRelay {
//!     async fn send(&mut self, request: TransportRequest) -> Result<(), SessionError> {
//!         // Hand the request to your relay client
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<TransportCallback, SessionError>> {
//!         // Yield the next queued relay callback
//!         // Return None when the transport is gone for good
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), SessionError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::SessionError;
use crate::protocol::{TransportCallback, TransportRequest};

/// A request/callback channel to an external relay.
///
/// # Object Safety
///
/// This trait is object-safe, so `Box<dyn Transport>` works for dynamic
/// dispatch. `Session::start` accepts `impl Transport` for the common case.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because the session
/// loop polls it inside `tokio::select!`. Channel-based implementations are
/// naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Hand one request to the relay.
    ///
    /// Requests are fire-and-forget: the outcome of a network operation is
    /// reported later through a callback, never through this result.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransportSend`] if the transport itself is
    /// broken and cannot accept requests any more. The session treats this
    /// as fatal.
    async fn send(&mut self, request: TransportRequest) -> Result<(), SessionError>;

    /// Receive the next relay callback.
    ///
    /// Returns:
    /// - `Some(Ok(callback))`: the next callback
    /// - `Some(Err(e))`: the transport failed
    /// - `None`: the transport is closed for good
    ///
    /// A relay-level disconnect is a regular
    /// [`Disconnected`](TransportCallback::Disconnected) callback, not `None`.
    async fn recv(&mut self) -> Option<Result<TransportCallback, SessionError>>;

    /// Release the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources even if it does.
    async fn close(&mut self) -> Result<(), SessionError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&mut self, request: TransportRequest) -> Result<(), SessionError> {
        (**self).send(request).await
    }

    async fn recv(&mut self) -> Option<Result<TransportCallback, SessionError>> {
        (**self).recv().await
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        (**self).close().await
    }
}
