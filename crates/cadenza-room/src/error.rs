//! Error types for the room layer.
//!
//! The `Display` strings are the exact error payloads clients receive in
//! the matching `Result` response variants.

/// Errors that can occur during room operations.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// No room with that id exists (or it was deleted).
    #[error("room not found")]
    NotFound,

    /// The id is in use. A deleted id becomes available again.
    #[error("room id already taken")]
    IdTaken,

    /// Room creation is currently disabled server-wide.
    #[error("room creation is disabled")]
    CreationDisabled,

    /// All eight player slots are occupied.
    #[error("room is full")]
    Full,

    /// The host locked the room against new joins.
    #[error("room is locked")]
    Locked,

    /// Joins are only accepted during chart selection.
    #[error("game in progress")]
    GameInProgress,

    /// The user is already a member of some room.
    #[error("already in a room")]
    AlreadyInRoom,

    /// The operation needs room membership.
    #[error("not in room")]
    NotInRoom,

    /// The operation is reserved for the host.
    #[error("only the host can do this")]
    NotHost,

    /// The user may not join as a monitor.
    #[error("monitoring not allowed")]
    MonitorNotAllowed,

    /// The room is in the wrong lifecycle state for this operation.
    #[error("invalid room state")]
    WrongState,

    /// Starting needs a selected chart.
    #[error("no chart selected")]
    NoChart,

    /// The user already readied up this round.
    #[error("already ready")]
    AlreadyReady,

    /// The user has not readied up this round.
    #[error("not ready")]
    NotReady,

    /// The user already uploaded a result this round.
    #[error("already uploaded")]
    AlreadyPlayed,

    /// The user already aborted this round.
    #[error("already aborted")]
    AlreadyAborted,

    /// The fetched record belongs to a different player.
    #[error("record player mismatch")]
    RecordPlayerMismatch,
}
