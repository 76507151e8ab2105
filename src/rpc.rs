//! Remote procedure calls on networked objects.
//!
//! [`RpcChannel`] is the inbound half: it maps `(object, method)` to a local
//! handler. The outbound half is [`Session::rpc`](crate::Session::rpc), which
//! validates the call, forwards it to the relay and schedules local delivery
//! according to the [`RpcTarget`](crate::protocol::RpcTarget).
//!
//! Calls for unknown `(object, method)` pairs are dropped with a warning;
//! handler failures are logged and never reach the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::error::{HandlerResult, Result, SessionError};
use crate::listener::isolate;
use crate::lock;
use crate::protocol::{ObjectRef, RpcCall};

/// A locally registered RPC method.
pub type RpcHandler = Arc<dyn Fn(&RpcCall) -> HandlerResult + Send + Sync>;

/// Build an [`RpcHandler`] from a closure.
pub fn rpc_handler<F>(f: F) -> RpcHandler
where
    F: Fn(&RpcCall) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Per-object table of RPC methods.
#[derive(Default)]
pub struct RpcChannel {
    methods: Mutex<HashMap<ObjectRef, HashMap<String, RpcHandler>>>,
}

impl RpcChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` as `method` on `object`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidArgument`] if `method` is empty.
    pub fn register(
        &self,
        object: ObjectRef,
        method: impl Into<String>,
        handler: RpcHandler,
    ) -> Result<()> {
        let method = method.into();
        validate_method(&method)?;
        let replaced = lock(&self.methods)
            .entry(object)
            .or_default()
            .insert(method.clone(), handler)
            .is_some();
        if replaced {
            debug!("rpc {object}.{method}: handler replaced");
        }
        Ok(())
    }

    /// Remove `method` from `object`. Returns `false` if it was not registered.
    pub fn unregister(&self, object: ObjectRef, method: &str) -> bool {
        let mut methods = lock(&self.methods);
        let Some(table) = methods.get_mut(&object) else {
            return false;
        };
        let removed = table.remove(method).is_some();
        if table.is_empty() {
            methods.remove(&object);
        }
        removed
    }

    /// Remove every method of `object`. Returns how many were removed.
    pub fn unregister_object(&self, object: ObjectRef) -> usize {
        lock(&self.methods).remove(&object).map_or(0, |t| t.len())
    }

    /// Returns `true` if `object` has a handler for `method`.
    pub fn has_method(&self, object: ObjectRef, method: &str) -> bool {
        lock(&self.methods)
            .get(&object)
            .is_some_and(|t| t.contains_key(method))
    }

    /// Run the handler for an inbound call.
    ///
    /// Returns `true` if a handler was found and completed successfully.
    pub fn deliver(&self, call: &RpcCall) -> bool {
        let handler = lock(&self.methods)
            .get(&call.object)
            .and_then(|t| t.get(&call.method))
            .cloned();
        match handler {
            Some(handler) => {
                let label = format!("{}.{}", call.object, call.method);
                isolate("rpc handler", &label, || handler(call))
            }
            None => {
                warn!(
                    "dropping rpc {}.{} from {:?}: no such method",
                    call.object, call.method, call.sender
                );
                false
            }
        }
    }

    /// Drop every registration.
    pub fn clear(&self) {
        lock(&self.methods).clear();
    }
}

impl std::fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChannel")
            .field("objects", &lock(&self.methods).len())
            .finish()
    }
}

pub(crate) fn validate_method(method: &str) -> Result<()> {
    if method.trim().is_empty() {
        return Err(SessionError::invalid("method", "must be non-empty"));
    }
    Ok(())
}
