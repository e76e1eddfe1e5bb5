//! Process-wide indexes of sessions and users.
//!
//! Backed by `DashMap` so lookups from many connection tasks stay
//! lock-free in the common case. The room registry lives in the room crate.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::{Session, User};

/// All live sessions, keyed by connection id.
#[derive(Default)]
pub struct SessionRegistry {
    map: DashMap<Uuid, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.map.insert(session.id, session);
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.map.get(id).map(|s| Arc::clone(&s))
    }

    pub fn remove(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.map.remove(id).map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// All known users, keyed by their external identity.
///
/// A user stays registered through the dangle window, which is what lets a
/// reconnecting session find its previous identity (and room) again.
#[derive(Default)]
pub struct UserRegistry {
    map: DashMap<i32, Arc<User>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: i32) -> Option<Arc<User>> {
        self.map.get(&id).map(|u| Arc::clone(&u))
    }

    /// Returns the registered user for `id`, inserting the one built by
    /// `make` if absent. Atomic, so two concurrent authentications of the
    /// same account converge on one `User`.
    pub fn get_or_insert_with(
        &self,
        id: i32,
        make: impl FnOnce() -> User,
    ) -> Arc<User> {
        Arc::clone(&self.map.entry(id).or_insert_with(|| Arc::new(make())))
    }

    pub fn remove(&self, id: i32) -> Option<Arc<User>> {
        self.map.remove(&id).map(|(_, u)| u)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
