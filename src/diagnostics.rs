//! Connectivity probes and identity logging.
//!
//! [`PingProbe`] sends a greeting over both the RPC path and the custom
//! event path, which makes it easy to see in the logs of every peer that
//! both are wired up.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tracing::info;

use crate::error::{Result, SessionError};
use crate::lock;
use crate::protocol::{DeliveryMode, ObjectRef, RaiseEventOptions, ReceiverGroup, RpcTarget};
use crate::router::{event_handler, EventHandler};
use crate::rpc::rpc_handler;
use crate::session::Session;

/// Custom event code used by [`PingProbe::event_ping`].
pub const PING_EVENT_CODE: u8 = 1;

/// RPC method used by [`PingProbe::rpc_ping`].
pub const LOG_MESSAGE_METHOD: &str = "log_message";

/// Greets every peer in the room and records greetings received.
pub struct PingProbe {
    session: Session,
    object: ObjectRef,
    handler: EventHandler,
    received: Arc<Mutex<Vec<String>>>,
}

impl PingProbe {
    /// Register the probe's RPC on `object` and its event handler.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownObject`] if `object` is not live.
    pub fn attach(session: &Session, object: ObjectRef) -> Result<Self> {
        if session.object(object).is_none() {
            return Err(SessionError::UnknownObject(object));
        }
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&received);
        session.rpc_channel().register(
            object,
            LOG_MESSAGE_METHOD,
            rpc_handler(move |call| {
                let message: String = call.arg(0)?;
                info!("ping probe: {message}");
                lock(&log).push(message);
                Ok(())
            }),
        )?;

        let log = Arc::clone(&received);
        let handler = event_handler(move |event| {
            let message = match &event.payload {
                Value::Null => "(null)".to_string(),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            info!("ping probe: {message}");
            lock(&log).push(message);
            Ok(())
        });
        session.register_event_handler(PING_EVENT_CODE, Arc::clone(&handler));

        Ok(Self {
            session: session.clone(),
            object,
            handler,
            received,
        })
    }

    /// Send "RPC says hi from <nick>" to everyone, the local peer included.
    ///
    /// Returns `Ok(false)` outside a room.
    pub fn rpc_ping(&self) -> Result<bool> {
        if !self.session.in_room() {
            return Ok(false);
        }
        let message = format!("RPC says hi from {}", self.nick_name());
        self.session.rpc(
            self.object,
            LOG_MESSAGE_METHOD,
            RpcTarget::All,
            Some(vec![json!(message)]),
        )?;
        Ok(true)
    }

    /// Raise a reliable "EVENT says hi from <nick>" event to everyone.
    ///
    /// Returns `Ok(false)` outside a room.
    pub fn event_ping(&self) -> Result<bool> {
        if !self.session.in_room() {
            return Ok(false);
        }
        let message = format!("EVENT says hi from {}", self.nick_name());
        self.session.raise_event(
            PING_EVENT_CODE,
            json!(message),
            RaiseEventOptions::to(ReceiverGroup::All),
            DeliveryMode::Reliable,
        )?;
        Ok(true)
    }

    /// Greetings received so far, oldest first.
    pub fn received(&self) -> Vec<String> {
        lock(&self.received).clone()
    }

    fn nick_name(&self) -> String {
        self.session
            .local_peer()
            .map(|p| p.nick_name)
            .unwrap_or_else(|| self.session.nick_name().to_string())
    }
}

impl std::fmt::Debug for PingProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PingProbe")
            .field("object", &self.object)
            .field("received", &lock(&self.received).len())
            .finish()
    }
}

impl Drop for PingProbe {
    fn drop(&mut self) {
        self.session
            .unregister_event_handler(PING_EVENT_CODE, &self.handler);
        self.session
            .rpc_channel()
            .unregister(self.object, LOG_MESSAGE_METHOD);
    }
}

/// One line describing `object` from the local peer's point of view.
///
/// Unknown actor or owner ids are shown as `-1`.
pub fn describe_object(session: &Session, object: ObjectRef) -> String {
    let actor = session.local_peer_id().map_or(-1, |p| p.0);
    match session.object(object) {
        Some(data) => {
            let name = if data.prefab.is_empty() {
                "scene object"
            } else {
                data.prefab.as_str()
            };
            format!(
                "[{actor}] I see {name} view_id={} is_mine={} owner={} pos={}",
                object.view_id(),
                session.is_mine(object),
                data.owner.map_or(-1, |p| p.0),
                data.position,
            )
        }
        None => format!("[{actor}] {object} is not a live networked object"),
    }
}

/// Log [`describe_object`] at `info`.
pub fn log_identity(session: &Session, object: ObjectRef) {
    info!("{}", describe_object(session, object));
}
