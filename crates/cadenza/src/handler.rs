//! Per-connection handler: handshake, command dispatch, and teardown.
//!
//! Each accepted socket gets one task running [`handle_connection`]:
//! a `select!` loop over the inbound command channel and a one-second
//! watchdog tick that kills connections idle past the configured timeout.
//! Responses to a session's own commands go out in command order; room
//! fan-out rides the best-effort broadcast path.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use uuid::Uuid;

use cadenza_protocol::{
    AuthInfo, ClientCommand, JoinResponse, JudgeEvent, Message, RoomId, ServerCommand, TouchFrame,
};
use cadenza_room::{Room, RoomError, RoomPhase};
use cadenza_session::{Session, SessionError, User};
use cadenza_transport::ServerStream;

use crate::server::ServerState;
use crate::CadenzaError;

/// Drives one connection from accept to teardown.
pub(crate) async fn handle_connection(
    socket: TcpStream,
    addr: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), CadenzaError> {
    let (stream, mut incoming) = ServerStream::accept(socket).await?;
    let session = Arc::new(Session::new(Uuid::new_v4(), stream));
    state.sessions.insert(Arc::clone(&session));
    tracing::info!(
        session = %session.id,
        %addr,
        version = session.stream().version(),
        "connection accepted"
    );

    let mut watchdog = tokio::time::interval(Duration::from_secs(1));
    let result = loop {
        tokio::select! {
            received = incoming.recv() => match received {
                Some(cmd) => {
                    if let Err(e) = dispatch(&state, &session, cmd).await {
                        break Err(e);
                    }
                }
                // EOF, undecodable frame, or oversize frame: all fatal.
                None => break Ok(()),
            },
            _ = watchdog.tick() => {
                if session.last_activity().elapsed() > state.config.idle_timeout {
                    tracing::info!(session = %session.id, "idle timeout");
                    break Ok(());
                }
            }
        }
    };

    teardown(&state, &session);
    result
}

/// Routes one client command. An `Err` is fatal for the session.
async fn dispatch(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    cmd: ClientCommand,
) -> Result<(), CadenzaError> {
    // Ping is the only command served before authentication.
    let cmd = match cmd {
        ClientCommand::Ping => {
            session.send(ServerCommand::Pong).await?;
            return Ok(());
        }
        ClientCommand::Authenticate { token } => {
            return authenticate(state, session, &token).await;
        }
        cmd => cmd,
    };
    if !session.is_authenticated() {
        tracing::warn!(session = %session.id, "command before authentication");
        return Err(SessionError::Unauthenticated.into());
    }
    let user = session.user().ok_or(SessionError::Unauthenticated)?;

    match cmd {
        // Both consumed above.
        ClientCommand::Ping | ClientCommand::Authenticate { .. } => {}

        ClientCommand::Chat { message } => {
            let result = match current_room(state, &user) {
                Ok(room) => {
                    room.send_message(Message::Chat {
                        user: user.id,
                        content: message,
                    });
                    Ok(())
                }
                Err(e) => Err(e.to_string()),
            };
            session.send(ServerCommand::Chat(result)).await?;
        }

        // Fire-and-forget: no response either way.
        ClientCommand::Touches { frames } => forward_touches(state, &user, frames),
        ClientCommand::Judges { judges } => forward_judges(state, &user, judges),

        ClientCommand::CreateRoom { id } => {
            let result = create_room(state, &user, id).map_err(|e| e.to_string());
            session.send(ServerCommand::CreateRoom(result)).await?;
        }

        ClientCommand::JoinRoom { id, monitor } => {
            let result = join_room(state, &user, id, monitor).map_err(|e| e.to_string());
            session.send(ServerCommand::JoinRoom(result)).await?;
        }

        ClientCommand::LeaveRoom => {
            let result = leave_room(state, &user).map_err(|e| e.to_string());
            session.send(ServerCommand::LeaveRoom(result)).await?;
        }

        ClientCommand::LockRoom { lock } => {
            let result = host_toggle(state, &user, |room| {
                room.set_locked(lock);
                room.send_message(Message::LockRoom { lock });
            })
            .map_err(|e| e.to_string());
            session.send(ServerCommand::LockRoom(result)).await?;
        }

        ClientCommand::CycleRoom { cycle } => {
            let result = host_toggle(state, &user, |room| {
                room.set_cycle(cycle);
                room.send_message(Message::CycleRoom { cycle });
            })
            .map_err(|e| e.to_string());
            session.send(ServerCommand::CycleRoom(result)).await?;
        }

        ClientCommand::SelectChart { id } => {
            let result = select_chart(state, &user, id).await;
            session.send(ServerCommand::SelectChart(result)).await?;
        }

        ClientCommand::RequestStart => {
            let result = current_room(state, &user)
                .and_then(|room| room.request_start(&user))
                .map_err(|e| e.to_string());
            session.send(ServerCommand::RequestStart(result)).await?;
        }

        ClientCommand::Ready => {
            let result = current_room(state, &user)
                .and_then(|room| room.ready(&user))
                .map_err(|e| e.to_string());
            session.send(ServerCommand::Ready(result)).await?;
        }

        ClientCommand::CancelReady => {
            let result = current_room(state, &user)
                .and_then(|room| room.cancel_ready(&user))
                .map_err(|e| e.to_string());
            session.send(ServerCommand::CancelReady(result)).await?;
        }

        ClientCommand::Played { id } => {
            let result = played(state, &user, id).await;
            session.send(ServerCommand::Played(result)).await?;
        }

        ClientCommand::Abort => {
            let result = current_room(state, &user)
                .and_then(|room| room.abort(&user))
                .map_err(|e| e.to_string());
            session.send(ServerCommand::Abort(result)).await?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Authentication and reconnect
// ---------------------------------------------------------------------------

async fn authenticate(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    token: &str,
) -> Result<(), CadenzaError> {
    let profile = match state.api.me(token).await {
        Ok(profile) => profile,
        Err(e) => {
            tracing::info!(session = %session.id, "authentication failed");
            session
                .send(ServerCommand::Authenticate(Err(e.to_string())))
                .await?;
            return Ok(());
        }
    };

    let user_id = profile.id;
    let user = state.users.get_or_insert_with(user_id, || User::new(profile));

    // If the user already has a live session this is a reconnect: the new
    // session supersedes the old one, which is torn down after the reply.
    // Binding also cancels any pending dangle timer.
    let stale = user
        .session_id()
        .filter(|old| *old != session.id)
        .and_then(|old| state.sessions.get(&old));
    user.bind_session(session.id, session.stream().clone());
    session.set_user(Arc::clone(&user));
    session.set_authenticated();

    let room = user
        .room()
        .and_then(|id| state.rooms.get(&id))
        .map(|room| room.client_state(&user));
    let rejoined = room.is_some();
    session
        .send(ServerCommand::Authenticate(Ok(AuthInfo {
            user: user.info(),
            room,
        })))
        .await?;
    tracing::info!(
        user = user.id,
        name = %user.name,
        session = %session.id,
        rejoined,
        "authenticated"
    );

    // The superseded session's teardown sees that the user now references a
    // newer session, so it cannot disturb user or room state.
    if let Some(old) = stale {
        tracing::info!(user = user.id, old_session = %old.id, "superseding stale session");
        teardown(state, &old);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Room operations
// ---------------------------------------------------------------------------

fn current_room(state: &ServerState, user: &User) -> Result<Arc<Room>, RoomError> {
    let id = user.room().ok_or(RoomError::NotInRoom)?;
    state.rooms.get(&id).ok_or(RoomError::NotFound)
}

fn create_room(state: &ServerState, user: &Arc<User>, id: RoomId) -> Result<(), RoomError> {
    if user.room().is_some() {
        return Err(RoomError::AlreadyInRoom);
    }
    if !state.room_creation_enabled.load(Ordering::Acquire) {
        return Err(RoomError::CreationDisabled);
    }
    let room = state.rooms.create(id, Arc::clone(user))?;
    room.send_message(Message::CreateRoom { user: user.id });
    Ok(())
}

fn join_room(
    state: &ServerState,
    user: &Arc<User>,
    id: RoomId,
    monitor: bool,
) -> Result<JoinResponse, RoomError> {
    if user.room().is_some() {
        return Err(RoomError::AlreadyInRoom);
    }
    let room = state.rooms.get(&id).ok_or(RoomError::NotFound)?;
    if monitor && !state.config.can_monitor(user.id) {
        return Err(RoomError::MonitorNotAllowed);
    }
    room.join(user, monitor)
}

fn leave_room(state: &ServerState, user: &Arc<User>) -> Result<(), RoomError> {
    let room = current_room(state, user)?;
    if room.leave(user) {
        state.rooms.remove(&room.id, "room is empty");
    }
    Ok(())
}

fn host_toggle(
    state: &ServerState,
    user: &Arc<User>,
    apply: impl FnOnce(&Room),
) -> Result<(), RoomError> {
    let room = current_room(state, user)?;
    room.check_host(user)?;
    apply(&room);
    Ok(())
}

/// Fetches the chart outside any room lock, then applies it. The room op
/// re-validates phase and host under its own lock.
async fn select_chart(
    state: &Arc<ServerState>,
    user: &Arc<User>,
    chart_id: i32,
) -> Result<(), String> {
    let room = current_room(state, user).map_err(|e| e.to_string())?;
    if room.phase() != RoomPhase::SelectChart {
        return Err(RoomError::WrongState.to_string());
    }
    room.check_host(user).map_err(|e| e.to_string())?;

    let chart = state.api.chart(chart_id).await.map_err(|e| e.to_string())?;
    tracing::info!(user = user.id, room = %room.id, chart = chart.id, name = %chart.name, "chart selected");
    room.select_chart(user, chart).map_err(|e| e.to_string())
}

/// Fetches the record outside any room lock, then applies it.
async fn played(state: &Arc<ServerState>, user: &Arc<User>, record_id: i32) -> Result<(), String> {
    let room = current_room(state, user).map_err(|e| e.to_string())?;
    if room.phase() != RoomPhase::Playing {
        return Err(RoomError::WrongState.to_string());
    }

    let record = state.api.record(record_id).await.map_err(|e| e.to_string())?;
    room.played(user, record).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Live frames
// ---------------------------------------------------------------------------

/// Touch batches go to monitors only, during a live round. The snapshot of
/// monitor handles is taken under the room's read lock; the fan-out happens
/// here, outside it.
fn forward_touches(state: &ServerState, user: &Arc<User>, frames: Vec<TouchFrame>) {
    let Ok(room) = current_room(state, user) else {
        return;
    };
    if room.phase() != RoomPhase::Playing || !room.is_live() {
        return;
    }
    if let Some(last) = frames.last() {
        user.set_game_time(last.time);
    }
    state.replay.touches(&room.id, user.id, &frames);
    room.broadcast_monitors(ServerCommand::Touches {
        player: user.id,
        frames,
    });
}

fn forward_judges(state: &ServerState, user: &Arc<User>, judges: Vec<JudgeEvent>) {
    let Ok(room) = current_room(state, user) else {
        return;
    };
    if room.phase() != RoomPhase::Playing || !room.is_live() {
        return;
    }
    state.replay.judges(&room.id, user.id, &judges);
    room.broadcast_monitors(ServerCommand::Judges {
        player: user.id,
        judges,
    });
}

// ---------------------------------------------------------------------------
// Teardown and the dangle window
// ---------------------------------------------------------------------------

/// Idempotent session teardown. If the owning user still references this
/// session, the dangle window starts; a user already rebound to a newer
/// session is left untouched.
pub(crate) fn teardown(state: &Arc<ServerState>, session: &Arc<Session>) {
    if !session.begin_teardown() {
        return;
    }
    state.sessions.remove(&session.id);
    if let Some(user) = session.user() {
        if user.clear_session(session.id) {
            schedule_dangle(state, user);
        }
    }
    session.shutdown();
    tracing::info!(session = %session.id, "session closed");
}

fn schedule_dangle(state: &Arc<ServerState>, user: Arc<User>) {
    let grace = state.config.dangle_grace;
    let state = Arc::clone(state);
    let expired_user = Arc::clone(&user);
    let handle = tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        dangle_expired(&state, &expired_user);
    });
    tracing::debug!(user = user.id, ?grace, "dangle window started");
    user.arm_dangle(handle);
}

/// The dangle timer fired. A rebound session cancels the timer, and this
/// path re-checks the slot anyway, so a reconnect that won the race keeps
/// the user in its room and in the registry.
fn dangle_expired(state: &Arc<ServerState>, user: &Arc<User>) {
    if user.session_id().is_some() {
        return;
    }
    tracing::info!(user = user.id, "dangle window elapsed, removing user");
    state.users.remove(user.id);
    if let Some(room_id) = user.room() {
        if let Some(room) = state.rooms.get(&room_id) {
            if room.leave(user) {
                state.rooms.remove(&room_id, "room is empty");
            }
        }
    }
}
