//! Lifecycle listeners and isolated fan-out.
//!
//! Anything that reacts to session lifecycle changes implements
//! [`SessionListener`] and registers itself with
//! [`Session::add_listener`](crate::Session::add_listener). Notifications are
//! delivered on the session loop in registration order. A listener that
//! returns an error (or panics) is logged and skipped; the remaining
//! listeners still receive the notification.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::error::HandlerResult;
use crate::error_codes::RoomFailure;
use crate::lock;
use crate::protocol::{DisconnectCause, InstantiationData, ObjectRef, Peer};
use crate::session::Session;

/// Callbacks for session lifecycle notifications.
///
/// Every method has a no-op default, so implementors only override what
/// they need. The `session` argument is the session that emitted the
/// notification; issuing further requests from inside a callback is fine
/// because every request is only queued.
#[allow(unused_variables)]
pub trait SessionListener: Send + Sync + 'static {
    fn on_connected_to_master(&self, session: &Session) -> HandlerResult {
        Ok(())
    }

    fn on_disconnected(&self, session: &Session, cause: DisconnectCause) -> HandlerResult {
        Ok(())
    }

    fn on_joined_lobby(&self, session: &Session) -> HandlerResult {
        Ok(())
    }

    fn on_left_lobby(&self, session: &Session) -> HandlerResult {
        Ok(())
    }

    fn on_created_room(&self, session: &Session) -> HandlerResult {
        Ok(())
    }

    fn on_create_room_failed(&self, session: &Session, failure: &RoomFailure) -> HandlerResult {
        Ok(())
    }

    fn on_joined_room(&self, session: &Session) -> HandlerResult {
        Ok(())
    }

    fn on_join_room_failed(&self, session: &Session, failure: &RoomFailure) -> HandlerResult {
        Ok(())
    }

    fn on_left_room(&self, session: &Session) -> HandlerResult {
        Ok(())
    }

    fn on_peer_entered(&self, session: &Session, peer: &Peer) -> HandlerResult {
        Ok(())
    }

    fn on_peer_left(&self, session: &Session, peer: &Peer) -> HandlerResult {
        Ok(())
    }

    fn on_master_client_switched(&self, session: &Session, new_master: &Peer) -> HandlerResult {
        Ok(())
    }

    /// A remote peer instantiated a networked object.
    fn on_object_instantiated(
        &self,
        session: &Session,
        object: &InstantiationData,
    ) -> HandlerResult {
        Ok(())
    }

    /// A networked object was destroyed remotely or by its owner leaving.
    fn on_object_destroyed(&self, session: &Session, object: ObjectRef) -> HandlerResult {
        Ok(())
    }
}

/// Ordered set of registered listeners.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: Mutex<Vec<Arc<dyn SessionListener>>>,
}

impl ListenerSet {
    /// Append a listener. Returns `false` if this exact `Arc` is already registered.
    pub(crate) fn add(&self, listener: Arc<dyn SessionListener>) -> bool {
        let mut listeners = lock(&self.listeners);
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub(crate) fn remove(&self, listener: &Arc<dyn SessionListener>) -> bool {
        let mut listeners = lock(&self.listeners);
        match listeners.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Invoke `f` on every listener registered at call time, in order.
    ///
    /// The lock is released before any listener runs, so listeners may add
    /// or remove listeners (including themselves) from inside a callback.
    pub(crate) fn notify<F>(&self, notification: &'static str, f: F)
    where
        F: Fn(&dyn SessionListener) -> HandlerResult,
    {
        let snapshot: Vec<Arc<dyn SessionListener>> = lock(&self.listeners).clone();
        for listener in &snapshot {
            isolate("listener", &notification, || f(listener.as_ref()));
        }
    }
}

/// Run one subscriber callback, containing its failure.
///
/// Returns `true` if the callback completed successfully. Errors and panics
/// are logged at `warn` with `kind`/`label` for context.
pub(crate) fn isolate<F>(kind: &str, label: &dyn fmt::Display, f: F) -> bool
where
    F: FnOnce() -> HandlerResult,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("{kind} for {label} failed: {e}");
            false
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            warn!("{kind} for {label} panicked: {message}");
            false
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    struct Named;
    impl SessionListener for Named {}

    #[test]
    fn duplicate_add_is_rejected_and_remove_reports_presence() {
        let set = ListenerSet::default();
        let a: Arc<dyn SessionListener> = Arc::new(Named);
        let b: Arc<dyn SessionListener> = Arc::new(Named);

        assert!(set.add(Arc::clone(&a)));
        assert!(!set.add(Arc::clone(&a)));
        assert!(set.add(Arc::clone(&b)));
        assert_eq!(set.len(), 2);

        assert!(set.remove(&a));
        assert!(!set.remove(&a));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn isolate_contains_errors_and_panics() {
        assert!(isolate("test", &"ok", || Ok(())));
        assert!(!isolate("test", &"err", || Err("boom".into())));
        assert!(!isolate("test", &"panic", || panic!("kaboom")));
    }
}
