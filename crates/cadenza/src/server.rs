//! Server builder, shared state, and the accept loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;

use cadenza_room::{NullReplay, ReplaySink, RoomManager};
use cadenza_session::{HttpApi, SessionRegistry, UserRegistry, WebApi};

use crate::handler::handle_connection;
use crate::{CadenzaError, ServerConfig};

/// Shared state cloned into every connection task.
pub(crate) struct ServerState {
    pub(crate) config: ServerConfig,
    pub(crate) sessions: SessionRegistry,
    pub(crate) users: UserRegistry,
    pub(crate) rooms: RoomManager,
    pub(crate) api: Arc<dyn WebApi>,
    pub(crate) replay: Arc<dyn ReplaySink>,
    pub(crate) room_creation_enabled: AtomicBool,
}

/// Registry counts, for operational surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStats {
    pub sessions: usize,
    pub users: usize,
    pub rooms: usize,
}

/// A cloneable control surface over a running server, for the admin layer:
/// registry counts and the room-creation switch.
#[derive(Clone)]
pub struct ServerHandle {
    state: Arc<ServerState>,
}

impl ServerHandle {
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            sessions: self.state.sessions.len(),
            users: self.state.users.len(),
            rooms: self.state.rooms.len(),
        }
    }

    pub fn is_room_creation_enabled(&self) -> bool {
        self.state.room_creation_enabled.load(Ordering::Acquire)
    }

    pub fn set_room_creation_enabled(&self, enabled: bool) {
        self.state.room_creation_enabled.store(enabled, Ordering::Release);
        tracing::info!(enabled, "room creation toggled");
    }
}

/// Builder for a [`Server`].
///
/// ```rust,no_run
/// # use cadenza::{Server, ServerConfig};
/// # async fn run() -> Result<(), cadenza::CadenzaError> {
/// let server = Server::builder()
///     .config(ServerConfig::default())
///     .bind("0.0.0.0:12346")
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct ServerBuilder {
    config: ServerConfig,
    api: Option<Arc<dyn WebApi>>,
    replay: Arc<dyn ReplaySink>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            api: None,
            replay: Arc::new(NullReplay),
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the bind address from the config.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind = addr.into();
        self
    }

    /// Substitutes the external web API (tests use a mock here). Defaults
    /// to [`HttpApi`] against the configured base URL.
    pub fn api(mut self, api: impl WebApi) -> Self {
        self.api = Some(Arc::new(api));
        self
    }

    /// Installs a replay recorder. Defaults to discarding everything.
    pub fn replay(mut self, replay: impl ReplaySink) -> Self {
        self.replay = Arc::new(replay);
        self
    }

    /// Binds the listener and assembles the shared state.
    pub async fn build(self) -> Result<Server, CadenzaError> {
        let api = match self.api {
            Some(api) => api,
            None => Arc::new(HttpApi::new(&self.config.api_base)?),
        };
        let listener = TcpListener::bind(&self.config.bind).await?;
        tracing::info!(addr = %self.config.bind, "listening");

        let state = Arc::new(ServerState {
            rooms: RoomManager::new(Arc::clone(&self.replay)),
            sessions: SessionRegistry::new(),
            users: UserRegistry::new(),
            api,
            replay: self.replay,
            room_creation_enabled: AtomicBool::new(true),
            config: self.config,
        });

        Ok(Server { listener, state })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The running TCP server.
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Accepts connections until the process ends, one handler task each.
    pub async fn run(self) -> Result<(), CadenzaError> {
        loop {
            match self.listener.accept().await {
                Ok((socket, addr)) => {
                    if let Err(e) = socket.set_nodelay(true) {
                        tracing::warn!(%addr, error = %e, "failed to disable nagle");
                    }
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(socket, addr, state).await {
                            tracing::debug!(%addr, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
