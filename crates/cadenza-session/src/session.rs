//! One live client connection and its protocol state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use uuid::Uuid;

use cadenza_protocol::ServerCommand;
use cadenza_transport::{ServerStream, TransportError};

use crate::User;

/// The server's record of a single connection.
///
/// A session starts unauthenticated, becomes authenticated when the external
/// identity check succeeds, and is torn down exactly once: on EOF, decode
/// failure, idle timeout, or when a reconnecting session supersedes it.
pub struct Session {
    pub id: Uuid,
    stream: ServerStream,
    user: Mutex<Option<Arc<User>>>,
    authenticated: AtomicBool,
    torn_down: AtomicBool,
}

impl Session {
    pub fn new(id: Uuid, stream: ServerStream) -> Self {
        Self {
            id,
            stream,
            user: Mutex::new(None),
            authenticated: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn stream(&self) -> &ServerStream {
        &self.stream
    }

    /// The user bound by a successful `Authenticate`, if any.
    pub fn user(&self) -> Option<Arc<User>> {
        self.user.lock().clone()
    }

    pub fn set_user(&self, user: Arc<User>) {
        *self.user.lock() = Some(user);
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn set_authenticated(&self) {
        self.authenticated.store(true, Ordering::Release);
    }

    /// Instant of the last byte received from the peer.
    pub fn last_activity(&self) -> Instant {
        self.stream.last_received()
    }

    /// Queues a reply, waiting for outbound capacity so that responses to a
    /// session's own commands keep their order.
    pub async fn send(&self, cmd: ServerCommand) -> Result<(), TransportError> {
        self.stream.send(cmd).await
    }

    /// Marks the session as being torn down. Returns `true` for the first
    /// caller only, making teardown idempotent under races between the
    /// recv loop, the idle watchdog, and reconnect supersession.
    pub fn begin_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::AcqRel)
    }

    /// Drops the underlying stream tasks.
    pub fn shutdown(&self) {
        self.stream.shutdown();
    }
}
