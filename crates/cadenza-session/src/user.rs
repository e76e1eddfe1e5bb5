//! Authenticated identities and the dangle window.
//!
//! A `User` outlives any single connection: when its session drops, the user
//! lingers for a grace period (the *dangle* window) so a quick reconnect
//! keeps room membership intact. Aggregates reference each other by id:
//! the user stores its room's `RoomId` and its session's `Uuid` plus a
//! cloned stream handle, never an owning pointer, so teardown can happen in
//! any order.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use cadenza_protocol::{Profile, RoomId, ServerCommand, UserInfo};
use cadenza_transport::ServerStream;

struct SessionRef {
    id: Uuid,
    stream: ServerStream,
}

/// An authenticated player or monitor.
pub struct User {
    pub id: i32,
    pub name: String,
    pub language: String,

    session: Mutex<Option<SessionRef>>,
    room: Mutex<Option<RoomId>>,
    monitor: AtomicBool,
    disconnected: AtomicBool,
    /// Latest touch-frame time, stored as f32 bits. Reset to −∞ each round.
    game_time: AtomicU32,
    dangle: Mutex<Option<JoinHandle<()>>>,
}

impl User {
    pub fn new(profile: Profile) -> Self {
        Self {
            id: profile.id,
            name: profile.name,
            language: profile.language,
            session: Mutex::new(None),
            room: Mutex::new(None),
            monitor: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            game_time: AtomicU32::new(f32::NEG_INFINITY.to_bits()),
            dangle: Mutex::new(None),
        }
    }

    /// The wire-visible identity.
    pub fn info(&self) -> UserInfo {
        UserInfo {
            id: self.id,
            name: self.name.clone(),
            monitor: self.is_monitor(),
        }
    }

    // -- Session binding ---------------------------------------------------

    /// Installs a new session, clearing the disconnected flag and cancelling
    /// any pending dangle timer. A racing dangle firing loses: it re-checks
    /// the session slot before acting.
    pub fn bind_session(&self, id: Uuid, stream: ServerStream) {
        *self.session.lock() = Some(SessionRef { id, stream });
        self.disconnected.store(false, Ordering::Release);
        self.disarm_dangle();
    }

    /// Id of the currently bound session, if any.
    pub fn session_id(&self) -> Option<Uuid> {
        self.session.lock().as_ref().map(|s| s.id)
    }

    /// Whether `id` is still the user's current session. An old session's
    /// teardown uses this to tell a real disconnect from supersession by a
    /// reconnect.
    pub fn is_current_session(&self, id: Uuid) -> bool {
        self.session_id() == Some(id)
    }

    /// Clears the session slot iff it still holds `id`. Returns whether it
    /// did, in which case the caller owns starting the dangle window.
    pub fn clear_session(&self, id: Uuid) -> bool {
        let mut slot = self.session.lock();
        if slot.as_ref().map(|s| s.id) == Some(id) {
            *slot = None;
            drop(slot);
            self.disconnected.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Forwards a command to the current session's stream, best-effort.
    /// Users without a live session silently drop the command; their own
    /// idle detection handles the rest.
    pub fn send(&self, cmd: ServerCommand) {
        if self.disconnected.load(Ordering::Acquire) {
            return;
        }
        let slot = self.session.lock();
        if let Some(session) = slot.as_ref() {
            if let Err(e) = session.stream.try_send(cmd) {
                tracing::trace!(user = self.id, error = %e, "dropped outbound command");
            }
        }
    }

    // -- Room pointer ------------------------------------------------------

    pub fn room(&self) -> Option<RoomId> {
        self.room.lock().clone()
    }

    pub fn set_room(&self, room: Option<RoomId>) {
        *self.room.lock() = room;
    }

    // -- Flags and game time ----------------------------------------------

    pub fn is_monitor(&self) -> bool {
        self.monitor.load(Ordering::Acquire)
    }

    pub fn set_monitor(&self, monitor: bool) {
        self.monitor.store(monitor, Ordering::Release);
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    pub fn game_time(&self) -> f32 {
        f32::from_bits(self.game_time.load(Ordering::Acquire))
    }

    pub fn set_game_time(&self, time: f32) {
        self.game_time.store(time.to_bits(), Ordering::Release);
    }

    pub fn reset_game_time(&self) {
        self.set_game_time(f32::NEG_INFINITY);
    }

    // -- Dangle timer ------------------------------------------------------

    /// Installs the dangle task handle, cancelling any previous one.
    pub fn arm_dangle(&self, handle: JoinHandle<()>) {
        if let Some(old) = self.dangle.lock().replace(handle) {
            old.abort();
        }
    }

    /// Cancels a pending dangle timer. Idempotent.
    pub fn disarm_dangle(&self) {
        if let Some(handle) = self.dangle.lock().take() {
            handle.abort();
        }
    }
}
