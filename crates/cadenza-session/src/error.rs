//! Error types for the session layer.
//!
//! The `Display` strings double as the error payloads sent back to clients
//! in `Result` responses, so they are fixed and deliberately terse.

/// Errors that can occur during authentication and external lookups.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The token was rejected, or the identity endpoint was unreachable.
    #[error("authentication failed")]
    AuthFailed,

    /// The chart endpoint returned non-200 or malformed data.
    #[error("chart not found")]
    ChartNotFound,

    /// The record endpoint returned non-200 or malformed data.
    #[error("record not found")]
    RecordNotFound,

    /// A command other than `Ping` arrived before authentication.
    #[error("not authenticated")]
    Unauthenticated,
}
