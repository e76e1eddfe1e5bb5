//! Contract for the replay collaborator.
//!
//! The core notifies a [`ReplaySink`] about round boundaries and live
//! frames; recording, buffering, and persistence are the sink's problem.
//! Implementations must return quickly and never fail loudly: nothing a
//! sink does may affect room progression.

use cadenza_protocol::{JudgeEvent, RoomId, TouchFrame};

/// Receives replay-relevant events from the room engine.
pub trait ReplaySink: Send + Sync + 'static {
    /// A round entered `Playing`.
    fn round_started(&self, _room: &RoomId, _chart: Option<i32>, _players: &[i32]) {}

    /// The round settled (everyone finished or aborted) or was cancelled.
    fn round_stopped(&self, _room: &RoomId) {}

    /// A player's touch batch, as forwarded to monitors.
    fn touches(&self, _room: &RoomId, _player: i32, _frames: &[TouchFrame]) {}

    /// A player's judgement batch, as forwarded to monitors.
    fn judges(&self, _room: &RoomId, _player: i32, _events: &[JudgeEvent]) {}

    /// A player's uploaded result was accepted.
    fn record_saved(&self, _room: &RoomId, _player: i32, _record: i32) {}
}

/// Discards everything. The default when no recorder is configured.
pub struct NullReplay;

impl ReplaySink for NullReplay {}
