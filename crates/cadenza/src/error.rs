//! Unified error type for the server crate.

use cadenza_protocol::ProtocolError;
use cadenza_room::RoomError;
use cadenza_session::SessionError;
use cadenza_transport::TransportError;

/// Top-level error wrapping every layer's failures.
#[derive(Debug, thiserror::Error)]
pub enum CadenzaError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}
