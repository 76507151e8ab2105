//! Owner-driven replication of animation parameters.
//!
//! [`AnimatorSync`] applies every parameter change to a local
//! [`AnimatorSink`] and, when the local peer owns the object, mirrors it to
//! the other peers with an [`RpcTarget::Others`] call.

use std::sync::Arc;

use serde_json::json;

use crate::error::{Result, SessionError};
use crate::protocol::{ObjectRef, RpcCall, RpcTarget};
use crate::rpc::rpc_handler;
use crate::session::Session;

pub const SET_TRIGGER_METHOD: &str = "set_trigger";
pub const SET_BOOL_METHOD: &str = "set_bool";
pub const SET_FLOAT_METHOD: &str = "set_float";
pub const CROSS_FADE_METHOD: &str = "cross_fade";

const METHODS: [&str; 4] = [
    SET_TRIGGER_METHOD,
    SET_BOOL_METHOD,
    SET_FLOAT_METHOD,
    CROSS_FADE_METHOD,
];

/// Local animation playback.
#[allow(unused_variables)]
pub trait AnimatorSink: Send + Sync + 'static {
    fn set_trigger(&self, name: &str);

    fn set_bool(&self, name: &str, value: bool);

    fn set_float(&self, name: &str, value: f32);

    /// Blend into `state` over `transition` (normalized) on `layer`.
    fn cross_fade(&self, state: &str, transition: f32, layer: i32, normalized_time: f32) {}
}

/// Replicates animator parameters of one networked object.
///
/// Dropping it unregisters the inbound RPC methods.
pub struct AnimatorSync<S: AnimatorSink> {
    session: Session,
    object: ObjectRef,
    sink: Arc<S>,
}

impl<S: AnimatorSink> AnimatorSync<S> {
    /// Bind `sink` to `object` and register the inbound handlers.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownObject`] if `object` is not live.
    pub fn attach(session: &Session, object: ObjectRef, sink: Arc<S>) -> Result<Self> {
        if session.object(object).is_none() {
            return Err(SessionError::UnknownObject(object));
        }
        let rpc = session.rpc_channel();

        let target = Arc::clone(&sink);
        rpc.register(
            object,
            SET_TRIGGER_METHOD,
            rpc_handler(move |call| {
                if let Some(name) = named(call)? {
                    target.set_trigger(&name);
                }
                Ok(())
            }),
        )?;

        let target = Arc::clone(&sink);
        rpc.register(
            object,
            SET_BOOL_METHOD,
            rpc_handler(move |call| {
                if let Some(name) = named(call)? {
                    target.set_bool(&name, call.arg(1)?);
                }
                Ok(())
            }),
        )?;

        let target = Arc::clone(&sink);
        rpc.register(
            object,
            SET_FLOAT_METHOD,
            rpc_handler(move |call| {
                if let Some(name) = named(call)? {
                    target.set_float(&name, call.arg(1)?);
                }
                Ok(())
            }),
        )?;

        let target = Arc::clone(&sink);
        rpc.register(
            object,
            CROSS_FADE_METHOD,
            rpc_handler(move |call| {
                if let Some(state) = named(call)? {
                    target.cross_fade(&state, call.arg(1)?, call.arg(2)?, call.arg(3)?);
                }
                Ok(())
            }),
        )?;

        Ok(Self {
            session: session.clone(),
            object,
            sink,
        })
    }

    /// Fire a trigger locally and, as owner, on the other peers.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidArgument`] if `name` is empty.
    pub fn set_trigger(&self, name: &str) -> Result<()> {
        require_name(name)?;
        self.sink.set_trigger(name);
        self.mirror(SET_TRIGGER_METHOD, vec![json!(name)])
    }

    pub fn set_bool(&self, name: &str, value: bool) -> Result<()> {
        require_name(name)?;
        self.sink.set_bool(name, value);
        self.mirror(SET_BOOL_METHOD, vec![json!(name), json!(value)])
    }

    pub fn set_float(&self, name: &str, value: f32) -> Result<()> {
        require_name(name)?;
        self.sink.set_float(name, value);
        self.mirror(SET_FLOAT_METHOD, vec![json!(name), json!(value)])
    }

    pub fn cross_fade(
        &self,
        state: &str,
        transition: f32,
        layer: i32,
        normalized_time: f32,
    ) -> Result<()> {
        require_name(state)?;
        self.sink.cross_fade(state, transition, layer, normalized_time);
        self.mirror(
            CROSS_FADE_METHOD,
            vec![
                json!(state),
                json!(transition),
                json!(layer),
                json!(normalized_time),
            ],
        )
    }

    pub fn object(&self) -> ObjectRef {
        self.object
    }

    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }

    fn mirror(&self, method: &str, args: Vec<serde_json::Value>) -> Result<()> {
        if !self.session.is_mine(self.object) {
            return Ok(());
        }
        self.session
            .rpc(self.object, method, RpcTarget::Others, Some(args))
    }
}

impl<S: AnimatorSink> std::fmt::Debug for AnimatorSync<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimatorSync")
            .field("object", &self.object)
            .finish()
    }
}

impl<S: AnimatorSink> Drop for AnimatorSync<S> {
    fn drop(&mut self) {
        let rpc = self.session.rpc_channel();
        for method in METHODS {
            rpc.unregister(self.object, method);
        }
    }
}

fn require_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SessionError::invalid("name", "must be non-empty"));
    }
    Ok(())
}

/// First argument as a parameter name; `None` for an empty name.
fn named(call: &RpcCall) -> Result<Option<String>> {
    let name: String = call.arg(0)?;
    Ok((!name.is_empty()).then_some(name))
}
