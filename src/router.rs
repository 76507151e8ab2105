//! Code-addressed routing of custom events to local subscribers.
//!
//! Each event code maps to an ordered list of handlers. Registering the same
//! handler twice makes it run twice; unregistering removes one reference.
//! Codes nobody registered for are dropped silently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::error::HandlerResult;
use crate::listener::isolate;
use crate::lock;
use crate::protocol::EventData;

/// A custom event subscriber.
pub type EventHandler = Arc<dyn Fn(&EventData) -> HandlerResult + Send + Sync>;

/// Build an [`EventHandler`] from a closure.
pub fn event_handler<F>(f: F) -> EventHandler
where
    F: Fn(&EventData) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Registry of custom event handlers keyed by event code.
#[derive(Default)]
pub struct EventRouter {
    handlers: Mutex<HashMap<u8, Vec<EventHandler>>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the subscriber list of `code`.
    pub fn register(&self, code: u8, handler: EventHandler) {
        lock(&self.handlers).entry(code).or_default().push(handler);
    }

    /// Remove one reference to `handler` from `code`.
    ///
    /// Returns `false` (and does nothing) if the handler is not registered
    /// for that code. The code entry disappears with its last handler.
    pub fn unregister(&self, code: u8, handler: &EventHandler) -> bool {
        let mut handlers = lock(&self.handlers);
        let Some(list) = handlers.get_mut(&code) else {
            return false;
        };
        let Some(index) = list.iter().position(|h| Arc::ptr_eq(h, handler)) else {
            return false;
        };
        list.remove(index);
        if list.is_empty() {
            handlers.remove(&code);
        }
        true
    }

    /// Number of handlers currently registered for `code`.
    pub fn handler_count(&self, code: u8) -> usize {
        lock(&self.handlers).get(&code).map_or(0, Vec::len)
    }

    /// Returns `true` if at least one handler is registered for `code`.
    pub fn is_registered(&self, code: u8) -> bool {
        lock(&self.handlers).contains_key(&code)
    }

    /// Deliver one event to every handler registered for its code.
    ///
    /// Handlers run in registration order against a snapshot taken on entry,
    /// so a handler may (un)register others without affecting this dispatch.
    /// A failing handler does not stop the remaining ones. Returns the number
    /// of handlers invoked.
    pub fn dispatch(&self, event: &EventData) -> usize {
        let snapshot = match lock(&self.handlers).get(&event.code) {
            Some(list) => list.clone(),
            None => {
                trace!("no handlers for event code {}", event.code);
                return 0;
            }
        };
        let label = format!("event code {}", event.code);
        for handler in &snapshot {
            isolate("event handler", &label, || handler(event));
        }
        snapshot.len()
    }

    /// Drop every registration.
    pub fn clear(&self) {
        lock(&self.handlers).clear();
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = lock(&self.handlers);
        let mut codes: Vec<(u8, usize)> = handlers.iter().map(|(c, l)| (*c, l.len())).collect();
        codes.sort_unstable();
        f.debug_struct("EventRouter").field("codes", &codes).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(code: u8) -> EventData {
        EventData {
            code,
            sender: None,
            payload: json!("hi"),
        }
    }

    fn counting(counter: &Arc<AtomicUsize>) -> EventHandler {
        let counter = Arc::clone(counter);
        event_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn double_registration_is_multicast() {
        let router = EventRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = counting(&hits);
        router.register(1, Arc::clone(&h));
        router.register(1, Arc::clone(&h));

        assert_eq!(router.dispatch(&event(1)), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        assert!(router.unregister(1, &h));
        assert_eq!(router.dispatch(&event(1)), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn last_unregister_drops_the_code() {
        let router = EventRouter::new();
        let h = counting(&Arc::new(AtomicUsize::new(0)));
        router.register(9, Arc::clone(&h));
        assert!(router.is_registered(9));
        assert!(router.unregister(9, &h));
        assert!(!router.is_registered(9));
        assert_eq!(router.dispatch(&event(9)), 0);
    }

    #[test]
    fn unregistering_unknown_handler_is_noop() {
        let router = EventRouter::new();
        let registered = counting(&Arc::new(AtomicUsize::new(0)));
        let stranger = counting(&Arc::new(AtomicUsize::new(0)));
        router.register(3, Arc::clone(&registered));

        assert!(!router.unregister(3, &stranger));
        assert!(!router.unregister(42, &stranger));
        assert_eq!(router.handler_count(3), 1);
    }

    #[test]
    fn failing_handler_does_not_block_later_ones() {
        let router = EventRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        router.register(5, event_handler(|_| Err("bad payload".into())));
        router.register(5, event_handler(|_| panic!("handler bug")));
        router.register(5, counting(&hits));

        assert_eq!(router.dispatch(&event(5)), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let router = EventRouter::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let order = Arc::clone(&order);
            router.register(
                2,
                event_handler(move |_| {
                    order.lock().unwrap().push(i);
                    Ok(())
                }),
            );
        }
        router.dispatch(&event(2));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }
}
