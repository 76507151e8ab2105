//! Owner-authoritative replicated integers.
//!
//! The owner of a networked object is the only peer that changes the value.
//! Each change is broadcast as an absolute value with [`RpcTarget::All`];
//! every peer (the owner included, through the session loop) overwrites its
//! copy on receipt. The owner skips the overwrite for echoes of its own
//! broadcasts while newer local writes are still in flight. Depletion
//! callbacks fire on receipt, once per drop from a positive value to zero.

use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::debug;

use crate::error::{Result, SessionError};
use crate::listener::isolate;
use crate::lock;
use crate::protocol::{ObjectRef, PeerId, RpcTarget};
use crate::rpc::{rpc_handler, validate_method};
use crate::session::Session;

/// Default maximum for [`Health`].
pub const DEFAULT_MAX_HEALTH: i64 = 100;

/// RPC method carrying health updates.
pub const SET_HEALTH_METHOD: &str = "set_health";

/// Callback invoked when a value is depleted.
pub type DepletionCallback = Arc<dyn Fn(ObjectRef) + Send + Sync>;

struct ValueState {
    current: i64,
    max: i64,
    depleted: bool,
    /// Local broadcasts whose own echo has not come back yet.
    pending_echoes: u32,
    /// Peer that issued the pending broadcasts.
    author: Option<PeerId>,
    on_depleted: Vec<DepletionCallback>,
}

impl ValueState {
    fn new(max: i64) -> Self {
        Self {
            current: max,
            max,
            depleted: false,
            pending_echoes: 0,
            author: None,
            on_depleted: Vec::new(),
        }
    }

    /// Overwrite with a received value. Returns the callbacks to fire.
    fn receive(&mut self, value: i64) -> Vec<DepletionCallback> {
        self.current = value;
        self.track_depletion(value)
    }

    /// Handle a received value sent by `sender`.
    ///
    /// An echo of a local broadcast never overwrites a newer local write; it
    /// only drives the depletion transitions.
    fn receive_from(&mut self, sender: Option<PeerId>, value: i64) -> Vec<DepletionCallback> {
        if self.pending_echoes > 0 && sender.is_some() && sender == self.author {
            self.pending_echoes -= 1;
            if self.pending_echoes > 0 {
                return self.track_depletion(value);
            }
        }
        self.receive(value)
    }

    fn track_depletion(&mut self, value: i64) -> Vec<DepletionCallback> {
        if value > 0 {
            self.depleted = false;
            return Vec::new();
        }
        if self.depleted {
            return Vec::new();
        }
        self.depleted = true;
        self.on_depleted.clone()
    }
}

fn fire(callbacks: Vec<DepletionCallback>, object: ObjectRef) {
    for callback in callbacks {
        isolate("depletion callback", &object, || {
            callback(object);
            Ok(())
        });
    }
}

fn apply_received(state: &Mutex<ValueState>, object: ObjectRef, value: i64) {
    let callbacks = lock(state).receive(value);
    fire(callbacks, object);
}

/// An integer in `[0, max]` replicated from the owner of a networked object.
///
/// Dropping the value unregisters its RPC method.
pub struct AuthoritativeValue {
    session: Session,
    object: ObjectRef,
    method: String,
    state: Arc<Mutex<ValueState>>,
}

impl AuthoritativeValue {
    /// Bind a value to `object`, receiving updates through RPC `method`.
    ///
    /// The value starts at `max`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidArgument`] if `max` is not positive or
    ///   `method` is empty
    /// - [`SessionError::UnknownObject`] if `object` is not live
    pub fn attach(
        session: &Session,
        object: ObjectRef,
        method: impl Into<String>,
        max: i64,
    ) -> Result<Self> {
        let method = method.into();
        validate_method(&method)?;
        if max <= 0 {
            return Err(SessionError::invalid("max", format!("must be positive, got {max}")));
        }
        if session.object(object).is_none() {
            return Err(SessionError::UnknownObject(object));
        }

        let state = Arc::new(Mutex::new(ValueState::new(max)));
        let inbound = Arc::clone(&state);
        session.rpc_channel().register(
            object,
            method.clone(),
            rpc_handler(move |call| {
                let value: i64 = call.arg(0)?;
                let callbacks = lock(&inbound).receive_from(call.sender, value);
                fire(callbacks, call.object);
                Ok(())
            }),
        )?;

        Ok(Self {
            session: session.clone(),
            object,
            method,
            state,
        })
    }

    /// Change the value by `delta`, clamped to `[0, max]`, and broadcast it.
    ///
    /// Returns `Ok(false)` without broadcasting when `delta` is zero or the
    /// clamped value equals the current one.
    ///
    /// # Errors
    ///
    /// - [`SessionError::UnknownObject`] if the object is gone
    /// - [`SessionError::NotOwner`] if the local peer does not control it
    /// - any error from [`Session::rpc`]
    pub fn apply_local_delta(&self, delta: i64) -> Result<bool> {
        let owner = self
            .session
            .object(self.object)
            .ok_or(SessionError::UnknownObject(self.object))?
            .owner;
        if !self.session.is_mine(self.object) {
            return Err(SessionError::NotOwner {
                object: self.object,
                owner,
            });
        }
        if delta == 0 {
            return Ok(false);
        }
        let local = self.session.local_peer_id();

        let (previous, next) = {
            let mut state = lock(&self.state);
            let next = state.current.saturating_add(delta).clamp(0, state.max);
            if next == state.current {
                return Ok(false);
            }
            let previous = state.current;
            state.current = next;
            if state.author != local {
                state.author = local;
                state.pending_echoes = 0;
            }
            state.pending_echoes = state.pending_echoes.saturating_add(1);
            (previous, next)
        };

        debug!("{}.{}: {previous} -> {next}", self.object, self.method);
        if let Err(e) = self
            .session
            .rpc(self.object, &self.method, RpcTarget::All, Some(vec![json!(next)]))
        {
            let mut state = lock(&self.state);
            state.pending_echoes = state.pending_echoes.saturating_sub(1);
            if state.current == next {
                state.current = previous;
            }
            return Err(e);
        }
        Ok(true)
    }

    /// Overwrite the local copy with an authoritative value.
    ///
    /// This is what the inbound RPC handler does; it is public for
    /// transports that replicate state out of band.
    pub fn apply_received_value(&self, value: i64) {
        apply_received(&self.state, self.object, value);
    }

    /// Register a callback for the transition to zero.
    pub fn on_depleted<F>(&self, callback: F)
    where
        F: Fn(ObjectRef) + Send + Sync + 'static,
    {
        lock(&self.state).on_depleted.push(Arc::new(callback));
    }

    pub fn current(&self) -> i64 {
        lock(&self.state).current
    }

    pub fn max(&self) -> i64 {
        lock(&self.state).max
    }

    pub fn object(&self) -> ObjectRef {
        self.object
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl std::fmt::Debug for AuthoritativeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("AuthoritativeValue")
            .field("object", &self.object)
            .field("method", &self.method)
            .field("current", &state.current)
            .field("max", &state.max)
            .finish()
    }
}

impl Drop for AuthoritativeValue {
    fn drop(&mut self) {
        self.session.rpc_channel().unregister(self.object, &self.method);
    }
}

/// Replicated hit points of a networked object.
#[derive(Debug)]
pub struct Health {
    value: AuthoritativeValue,
}

impl Health {
    /// Attach with the default maximum of 100.
    pub fn attach(session: &Session, object: ObjectRef) -> Result<Self> {
        Self::with_max(session, object, DEFAULT_MAX_HEALTH)
    }

    pub fn with_max(session: &Session, object: ObjectRef, max: i64) -> Result<Self> {
        Ok(Self {
            value: AuthoritativeValue::attach(session, object, SET_HEALTH_METHOD, max)?,
        })
    }

    /// Lose `amount` health. Non-positive amounts are ignored.
    pub fn take_damage(&self, amount: i64) -> Result<bool> {
        if amount <= 0 {
            return Ok(false);
        }
        self.value.apply_local_delta(amount.saturating_neg())
    }

    /// Regain `amount` health, up to the maximum. Non-positive amounts are ignored.
    pub fn heal(&self, amount: i64) -> Result<bool> {
        if amount <= 0 {
            return Ok(false);
        }
        self.value.apply_local_delta(amount)
    }

    pub fn health(&self) -> i64 {
        self.value.current()
    }

    pub fn max_health(&self) -> i64 {
        self.value.max()
    }

    pub fn is_dead(&self) -> bool {
        self.health() <= 0
    }

    /// Register a death callback.
    pub fn on_death<F>(&self, callback: F)
    where
        F: Fn(ObjectRef) + Send + Sync + 'static,
    {
        self.value.on_depleted(callback);
    }

    /// The underlying replicated value.
    pub fn value(&self) -> &AuthoritativeValue {
        &self.value
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_state(max: i64) -> (Mutex<ValueState>, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let mut state = ValueState::new(max);
        state.on_depleted.push(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        (Mutex::new(state), hits)
    }

    #[test]
    fn depletion_fires_once_per_transition() {
        let (state, hits) = counting_state(100);
        let object = ObjectRef::new(1001);

        apply_received(&state, object, 40);
        apply_received(&state, object, 0);
        apply_received(&state, object, 0);
        apply_received(&state, object, -5);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Revived, then depleted again.
        apply_received(&state, object, 10);
        apply_received(&state, object, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn received_values_overwrite_unconditionally() {
        let (state, hits) = counting_state(100);
        let object = ObjectRef::new(1001);
        apply_received(&state, object, 250);
        assert_eq!(lock(&state).current, 250);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn own_echoes_do_not_roll_back_newer_writes() {
        let (state, hits) = counting_state(100);
        let owner = Some(PeerId(1));
        {
            let mut s = lock(&state);
            s.author = owner;
            s.pending_echoes = 2;
            s.current = 40;
        }

        let fired = lock(&state).receive_from(owner, 70);
        assert!(fired.is_empty());
        assert_eq!(lock(&state).current, 40);
        assert_eq!(lock(&state).pending_echoes, 1);

        let fired = lock(&state).receive_from(owner, 40);
        assert!(fired.is_empty());
        assert_eq!(lock(&state).current, 40);
        assert_eq!(lock(&state).pending_echoes, 0);

        // Nothing pending: a later echo overwrites again.
        let fired = lock(&state).receive_from(owner, 0);
        assert_eq!(fired.len(), 1);
        assert_eq!(lock(&state).current, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn remote_values_apply_while_echoes_are_pending() {
        let (state, _) = counting_state(100);
        {
            let mut s = lock(&state);
            s.author = Some(PeerId(1));
            s.pending_echoes = 1;
        }
        let _ = lock(&state).receive_from(Some(PeerId(2)), 55);
        assert_eq!(lock(&state).current, 55);
        assert_eq!(lock(&state).pending_echoes, 1);
    }

    #[test]
    fn panicking_callback_does_not_block_others() {
        let (state, hits) = counting_state(100);
        lock(&state)
            .on_depleted
            .insert(0, Arc::new(|_| panic!("death animation missing")));
        apply_received(&state, ObjectRef::new(1001), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
