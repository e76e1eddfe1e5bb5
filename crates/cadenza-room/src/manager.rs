//! Room registry: creates, finds, and deletes rooms.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use cadenza_protocol::RoomId;
use cadenza_session::User;

use crate::{Room, RoomError, ReplaySink};

/// The process-wide room index.
///
/// Creation is insert-if-absent, so two users racing for the same id get
/// exactly one room between them. Removal is terminal for the id's current
/// occupant; the id itself becomes available again.
pub struct RoomManager {
    rooms: DashMap<RoomId, Arc<Room>>,
    replay: Arc<dyn ReplaySink>,
}

impl RoomManager {
    pub fn new(replay: Arc<dyn ReplaySink>) -> Self {
        Self {
            rooms: DashMap::new(),
            replay,
        }
    }

    /// Creates a room with `host` as its first player.
    pub fn create(&self, id: RoomId, host: Arc<User>) -> Result<Arc<Room>, RoomError> {
        match self.rooms.entry(id.clone()) {
            Entry::Occupied(_) => Err(RoomError::IdTaken),
            Entry::Vacant(slot) => {
                let room = Arc::new(Room::new(id, host, Arc::clone(&self.replay)));
                slot.insert(Arc::clone(&room));
                tracing::info!(room = %room.id, host = room.host_id(), "room created");
                Ok(room)
            }
        }
    }

    pub fn get(&self, id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.get(id).map(|r| Arc::clone(&r))
    }

    /// Deletes a room, clearing the room pointer of anyone still inside
    /// (monitors outlive the last player).
    pub fn remove(&self, id: &RoomId, reason: &str) -> Option<Arc<Room>> {
        let (_, room) = self.rooms.remove(id)?;
        for user in room.everyone() {
            user.set_room(None);
        }
        tracing::info!(room = %id, reason, "room removed");
        Some(room)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Snapshot of every live room.
    pub fn rooms(&self) -> Vec<Arc<Room>> {
        self.rooms.iter().map(|r| Arc::clone(&r)).collect()
    }
}
