//! # Cadenza
//!
//! The server side of a multiplayer session service for a rhythm game.
//! Clients connect over TCP with a hand-rolled binary protocol,
//! authenticate against an external web API, and gather in rooms that move
//! through chart selection, ready-up, and synchronized play.
//!
//! The workspace layers are re-exported here so embedders need a single
//! dependency:
//!
//! ```text
//! transport (frames) → protocol (commands) → session (identity) → room (rounds)
//! ```

mod config;
mod error;
mod handler;
mod server;

pub use config::ServerConfig;
pub use error::CadenzaError;
pub use server::{Server, ServerBuilder, ServerHandle, ServerStats};

/// Re-exports of the key types from each layer.
pub mod prelude {
    pub use crate::{CadenzaError, Server, ServerBuilder, ServerConfig, ServerHandle, ServerStats};

    pub use cadenza_protocol::{
        AuthInfo, Chart, ClientCommand, ClientRoomState, CompactPos, JoinResponse, JudgeEvent,
        Judgement, Message, Profile, ProtocolError, Record, RoomId, RoomState, ServerCommand,
        TouchFrame, TouchPoint, UserInfo,
    };
    pub use cadenza_room::{
        NullReplay, ReplaySink, Room, RoomError, RoomManager, RoomPhase, ROOM_MAX_PLAYERS,
    };
    pub use cadenza_session::{
        HttpApi, Session, SessionError, SessionRegistry, User, UserRegistry, WebApi,
    };
    pub use cadenza_transport::{
        ClientStream, ServerStream, TransportError, MAX_FRAME_LEN, PROTOCOL_VERSION,
    };
}
