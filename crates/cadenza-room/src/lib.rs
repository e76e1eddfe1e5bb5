//! Room lifecycle management for Cadenza.
//!
//! A [`Room`] coordinates up to eight players (plus monitors) through
//! select → ready → play → settle, with host transfer and best-effort
//! broadcasts. The [`RoomManager`] is the process-wide index; the
//! [`ReplaySink`] trait is the seam for the replay collaborator.

mod error;
mod manager;
mod replay;
mod room;

pub use error::RoomError;
pub use manager::RoomManager;
pub use replay::{NullReplay, ReplaySink};
pub use room::{Room, RoomPhase, ROOM_MAX_PLAYERS};
