//! Connect and join a fixed room with no further input.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{HandlerResult, Result, SessionError};
use crate::error_codes::RoomFailure;
use crate::listener::SessionListener;
use crate::protocol::{DisconnectCause, LobbyDescriptor, RoomOptions};
use crate::session::Session;

const DEFAULT_ROOM_NAME: &str = "dev-room";
const DEFAULT_MAX_PEERS: u8 = 8;

/// Configuration for [`AutoJoin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoJoinConfig {
    /// Room to join or create. Defaults to `"dev-room"`.
    pub room_name: String,
    /// Capacity used when the room has to be created. Defaults to 8.
    pub max_peers: u8,
    /// Lobby the room is listed in; `None` for the default lobby.
    pub lobby: Option<LobbyDescriptor>,
}

impl Default for AutoJoinConfig {
    fn default() -> Self {
        Self {
            room_name: DEFAULT_ROOM_NAME.to_string(),
            max_peers: DEFAULT_MAX_PEERS,
            lobby: None,
        }
    }
}

impl AutoJoinConfig {
    pub fn new(room_name: impl Into<String>) -> Self {
        Self {
            room_name: room_name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_peers(mut self, max_peers: u8) -> Self {
        self.max_peers = max_peers;
        self
    }

    #[must_use]
    pub fn with_lobby(mut self, lobby: LobbyDescriptor) -> Self {
        self.lobby = Some(lobby);
        self
    }
}

/// Joins (or creates) the configured room every time the session reaches
/// the master server.
#[derive(Debug)]
pub struct AutoJoin {
    config: AutoJoinConfig,
}

impl AutoJoin {
    /// Register with `session` and start connecting.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidArgument`] for an empty room name or zero capacity
    /// - [`SessionError::ShutDown`] if the session loop has exited
    pub fn start(session: &Session, config: AutoJoinConfig) -> Result<Arc<Self>> {
        if config.room_name.trim().is_empty() {
            return Err(SessionError::invalid("room_name", "must be non-empty"));
        }
        if config.max_peers == 0 {
            return Err(SessionError::invalid("max_peers", "must be positive"));
        }
        let this = Arc::new(Self { config });
        session.add_listener(Arc::clone(&this) as Arc<dyn SessionListener>);
        info!("auto-join: connecting");
        session.connect()?;
        Ok(this)
    }

    /// Stop reacting to the session. Returns `false` if already stopped.
    pub fn stop(self: &Arc<Self>, session: &Session) -> bool {
        let listener: Arc<dyn SessionListener> = Arc::clone(self) as Arc<dyn SessionListener>;
        session.remove_listener(&listener)
    }

    pub fn config(&self) -> &AutoJoinConfig {
        &self.config
    }
}

impl SessionListener for AutoJoin {
    fn on_connected_to_master(&self, session: &Session) -> HandlerResult {
        info!(
            "auto-join: connected to master, joining or creating {}",
            self.config.room_name
        );
        session.create_or_join_room(
            &self.config.room_name,
            RoomOptions::default().with_max_peers(self.config.max_peers),
            self.config.lobby.clone(),
            &[],
        )?;
        Ok(())
    }

    fn on_joined_room(&self, session: &Session) -> HandlerResult {
        info!(
            "auto-join: joined room, in_room = {}, peers = {}",
            session.in_room(),
            session.peer_count()
        );
        Ok(())
    }

    fn on_join_room_failed(&self, _session: &Session, failure: &RoomFailure) -> HandlerResult {
        warn!("auto-join: could not join {}: {failure}", self.config.room_name);
        Ok(())
    }

    fn on_disconnected(&self, _session: &Session, cause: DisconnectCause) -> HandlerResult {
        info!("auto-join: disconnected ({cause:?})");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AutoJoinConfig::default();
        assert_eq!(config.room_name, "dev-room");
        assert_eq!(config.max_peers, 8);
        assert!(config.lobby.is_none());

        let config = AutoJoinConfig::new("arena").with_max_peers(4);
        assert_eq!(config.room_name, "arena");
        assert_eq!(config.max_peers, 4);
    }
}
