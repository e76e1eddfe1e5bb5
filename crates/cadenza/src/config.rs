//! Server configuration.

use std::collections::HashSet;
use std::time::Duration;

use cadenza_session::HttpApi;

/// Everything the core consumes at startup. Taken as a snapshot; nothing
/// here changes while the server runs (the room-creation switch is runtime
/// state on the server itself).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind: String,

    /// Base URL of the identity/chart/record web API.
    pub api_base: String,

    /// When false, nobody may join as a monitor.
    pub live_mode: bool,

    /// User ids permitted to spectate (effective only with `live_mode`).
    pub monitors: HashSet<i32>,

    /// Grace period a disconnected user has to reconnect before being
    /// removed from the server and their room.
    pub dangle_grace: Duration,

    /// A connection that has not delivered a byte for this long is dead.
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:12346".into(),
            api_base: HttpApi::DEFAULT_BASE.into(),
            live_mode: false,
            monitors: HashSet::new(),
            dangle_grace: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Whether `id` may join rooms as a spectator.
    pub fn can_monitor(&self, id: i32) -> bool {
        self.live_mode && self.monitors.contains(&id)
    }
}
