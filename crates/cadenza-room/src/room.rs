//! Room: membership, host, flags, and the round state machine.
//!
//! Flags are atomics; everything else lives under one `RwLock` per room, so
//! membership and per-round bookkeeping mutate serially while snapshots stay
//! concurrent. The lock is never held across an await; every send inside
//! it is a non-blocking `try_send` through the member's stream handle.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;

use cadenza_protocol::{
    Chart, ClientRoomState, JoinResponse, Message, Record, RoomId, RoomState, ServerCommand,
    UserInfo,
};
use cadenza_session::User;

use crate::{ReplaySink, RoomError};

/// Player slots per room. Monitors are not counted against this.
pub const ROOM_MAX_PLAYERS: usize = 8;

/// A room's lifecycle phase.
///
/// ```text
/// SelectChart ──(RequestStart)──→ WaitForReady ──(all ready)──→ Playing
///      ↑                               │                           │
///      └────────(host cancels)─────────┘        (all settled)──────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    SelectChart,
    WaitForReady,
    Playing,
}

struct RoomInner {
    host: Arc<User>,
    phase: RoomPhase,
    chart: Option<Chart>,
    players: Vec<Arc<User>>,
    monitors: Vec<Arc<User>>,
    /// Players that readied up this round.
    ready: HashSet<i32>,
    /// Uploaded results this round.
    results: HashMap<i32, Record>,
    /// Players that gave up this round. Disjoint from `results`.
    aborted: HashSet<i32>,
}

/// A coordinated group of up to eight players plus any number of monitors.
pub struct Room {
    pub id: RoomId,
    live: AtomicBool,
    locked: AtomicBool,
    cycle: AtomicBool,
    replay: Arc<dyn ReplaySink>,
    inner: RwLock<RoomInner>,
}

impl Room {
    /// Creates a room with `host` as its sole player, in `SelectChart`.
    pub fn new(id: RoomId, host: Arc<User>, replay: Arc<dyn ReplaySink>) -> Self {
        host.set_monitor(false);
        host.set_room(Some(id.clone()));
        Self {
            id,
            live: AtomicBool::new(false),
            locked: AtomicBool::new(false),
            cycle: AtomicBool::new(false),
            replay,
            inner: RwLock::new(RoomInner {
                host: Arc::clone(&host),
                phase: RoomPhase::SelectChart,
                chart: None,
                players: vec![host],
                monitors: Vec::new(),
                ready: HashSet::new(),
                results: HashMap::new(),
                aborted: HashSet::new(),
            }),
        }
    }

    // -- Flags -------------------------------------------------------------

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::Release);
    }

    pub fn is_cycle(&self) -> bool {
        self.cycle.load(Ordering::Acquire)
    }

    pub fn set_cycle(&self, cycle: bool) {
        self.cycle.store(cycle, Ordering::Release);
    }

    // -- Snapshots ---------------------------------------------------------

    pub fn phase(&self) -> RoomPhase {
        self.inner.read().phase
    }

    pub fn host_id(&self) -> i32 {
        self.inner.read().host.id
    }

    pub fn check_host(&self, user: &User) -> Result<(), RoomError> {
        if self.host_id() == user.id {
            Ok(())
        } else {
            Err(RoomError::NotHost)
        }
    }

    pub fn chart(&self) -> Option<Chart> {
        self.inner.read().chart.clone()
    }

    pub fn player_count(&self) -> usize {
        self.inner.read().players.len()
    }

    pub fn players(&self) -> Vec<Arc<User>> {
        self.inner.read().players.clone()
    }

    /// Monitor handles only; the hot path for touch/judge fan-out snapshots
    /// these under the read lock and sends after dropping it.
    pub fn monitors(&self) -> Vec<Arc<User>> {
        self.inner.read().monitors.clone()
    }

    pub fn everyone(&self) -> Vec<Arc<User>> {
        let inner = self.inner.read();
        inner
            .players
            .iter()
            .chain(inner.monitors.iter())
            .cloned()
            .collect()
    }

    /// The wire form of the current state, chart id included.
    pub fn wire_state(&self) -> RoomState {
        Self::wire_state_of(&self.inner.read())
    }

    fn wire_state_of(inner: &RoomInner) -> RoomState {
        match inner.phase {
            RoomPhase::SelectChart => {
                RoomState::SelectChart(inner.chart.as_ref().map(|c| c.id))
            }
            RoomPhase::WaitForReady => RoomState::WaitingForReady,
            RoomPhase::Playing => RoomState::Playing,
        }
    }

    /// The snapshot a reconnecting client receives with its auth response.
    pub fn client_state(&self, user: &User) -> ClientRoomState {
        let inner = self.inner.read();
        let users = inner
            .players
            .iter()
            .chain(inner.monitors.iter())
            .map(|u| (u.id, u.info()))
            .collect();
        ClientRoomState {
            id: self.id.clone(),
            state: Self::wire_state_of(&inner),
            live: self.is_live(),
            locked: self.is_locked(),
            cycle: self.is_cycle(),
            is_host: inner.host.id == user.id,
            is_ready: inner.phase == RoomPhase::WaitForReady && inner.ready.contains(&user.id),
            users,
        }
    }

    // -- Broadcasts --------------------------------------------------------

    fn broadcast_locked(inner: &RoomInner, cmd: ServerCommand) {
        for user in inner.players.iter().chain(inner.monitors.iter()) {
            user.send(cmd.clone());
        }
    }

    fn message_locked(inner: &RoomInner, msg: Message) {
        Self::broadcast_locked(inner, ServerCommand::Message(msg));
    }

    /// Sends to every player and monitor, best-effort per recipient.
    pub fn broadcast(&self, cmd: ServerCommand) {
        for user in self.everyone() {
            user.send(cmd.clone());
        }
    }

    /// Sends to monitors only.
    pub fn broadcast_monitors(&self, cmd: ServerCommand) {
        for user in self.monitors() {
            user.send(cmd.clone());
        }
    }

    /// Wraps a room message and broadcasts it to everyone.
    pub fn send_message(&self, msg: Message) {
        self.broadcast(ServerCommand::Message(msg));
    }

    // -- Membership --------------------------------------------------------

    /// Admits a user during chart selection. Monitors are uncapped and flip
    /// the room live; players occupy one of the eight slots.
    pub fn join(&self, user: &Arc<User>, monitor: bool) -> Result<JoinResponse, RoomError> {
        let mut inner = self.inner.write();
        if self.is_locked() {
            return Err(RoomError::Locked);
        }
        if inner.phase != RoomPhase::SelectChart {
            return Err(RoomError::GameInProgress);
        }
        if monitor {
            inner.monitors.push(Arc::clone(user));
            self.live.store(true, Ordering::Release);
        } else {
            if inner.players.len() >= ROOM_MAX_PLAYERS {
                return Err(RoomError::Full);
            }
            inner.players.push(Arc::clone(user));
        }
        user.set_monitor(monitor);
        user.set_room(Some(self.id.clone()));

        Self::broadcast_locked(&inner, ServerCommand::OnJoinRoom(user.info()));
        Self::message_locked(
            &inner,
            Message::JoinRoom {
                user: user.id,
                name: user.name.clone(),
            },
        );
        tracing::info!(room = %self.id, user = user.id, monitor, "user joined");

        let users: Vec<UserInfo> = inner
            .players
            .iter()
            .chain(inner.monitors.iter())
            .map(|u| u.info())
            .collect();
        Ok(JoinResponse {
            state: Self::wire_state_of(&inner),
            users,
            live: self.is_live(),
        })
    }

    /// Removes a user, transferring the host role or emptying the room as
    /// needed. Mid-game leavers count as aborted so the round can settle.
    ///
    /// Returns `true` when the last player left and the caller must delete
    /// the room.
    #[must_use = "a true return means the room must be deleted"]
    pub fn leave(&self, user: &Arc<User>) -> bool {
        let mut inner = self.inner.write();

        let is_player = inner.players.iter().any(|p| p.id == user.id);
        if inner.phase == RoomPhase::Playing
            && is_player
            && !inner.results.contains_key(&user.id)
            && !inner.aborted.contains(&user.id)
        {
            inner.aborted.insert(user.id);
            Self::message_locked(&inner, Message::Abort { user: user.id });
        }

        Self::message_locked(
            &inner,
            Message::LeaveRoom {
                user: user.id,
                name: user.name.clone(),
            },
        );
        inner.players.retain(|p| p.id != user.id);
        inner.monitors.retain(|m| m.id != user.id);
        inner.ready.remove(&user.id);
        user.set_room(None);
        tracing::info!(room = %self.id, user = user.id, "user left");

        if inner.players.is_empty() {
            return true;
        }

        if inner.host.id == user.id {
            let pick = rand::rng().random_range(0..inner.players.len());
            let new_host = Arc::clone(&inner.players[pick]);
            inner.host = Arc::clone(&new_host);
            Self::message_locked(&inner, Message::NewHost { user: new_host.id });
            new_host.send(ServerCommand::ChangeHost(true));
            tracing::info!(room = %self.id, from = user.id, to = new_host.id, "host transferred");
        }

        self.check_all_ready_locked(&mut inner);
        false
    }

    // -- Round operations --------------------------------------------------

    /// Host selects a chart during `SelectChart`. The chart has already
    /// been fetched; no external call happens under the lock.
    pub fn select_chart(&self, user: &User, chart: Chart) -> Result<(), RoomError> {
        let mut inner = self.inner.write();
        if inner.phase != RoomPhase::SelectChart {
            return Err(RoomError::WrongState);
        }
        if inner.host.id != user.id {
            return Err(RoomError::NotHost);
        }
        let id = chart.id;
        let name = chart.name.clone();
        inner.chart = Some(chart);
        Self::message_locked(
            &inner,
            Message::SelectChart {
                user: user.id,
                name,
                id,
            },
        );
        Self::broadcast_locked(&inner, ServerCommand::ChangeState(Self::wire_state_of(&inner)));
        Ok(())
    }

    /// Host opens the ready-up phase. The host counts as ready, so a solo
    /// host goes straight to `Playing` via the readiness check.
    pub fn request_start(&self, user: &User) -> Result<(), RoomError> {
        let mut inner = self.inner.write();
        if inner.phase != RoomPhase::SelectChart {
            return Err(RoomError::WrongState);
        }
        if inner.host.id != user.id {
            return Err(RoomError::NotHost);
        }
        if inner.chart.is_none() {
            return Err(RoomError::NoChart);
        }
        for player in &inner.players {
            player.reset_game_time();
        }
        Self::message_locked(&inner, Message::GameStart { user: user.id });
        inner.phase = RoomPhase::WaitForReady;
        inner.ready.clear();
        inner.ready.insert(user.id);
        Self::broadcast_locked(&inner, ServerCommand::ChangeState(RoomState::WaitingForReady));
        self.check_all_ready_locked(&mut inner);
        Ok(())
    }

    pub fn ready(&self, user: &User) -> Result<(), RoomError> {
        let mut inner = self.inner.write();
        if inner.phase != RoomPhase::WaitForReady {
            return Err(RoomError::WrongState);
        }
        // Per-round sets track players only; a monitor cannot ready up.
        if !inner.players.iter().any(|p| p.id == user.id) {
            return Err(RoomError::NotInRoom);
        }
        if !inner.ready.insert(user.id) {
            return Err(RoomError::AlreadyReady);
        }
        Self::message_locked(&inner, Message::Ready { user: user.id });
        self.check_all_ready_locked(&mut inner);
        Ok(())
    }

    /// Withdraws a ready. The host withdrawing cancels the whole round.
    pub fn cancel_ready(&self, user: &User) -> Result<(), RoomError> {
        let mut inner = self.inner.write();
        if inner.phase != RoomPhase::WaitForReady {
            return Err(RoomError::WrongState);
        }
        if !inner.ready.remove(&user.id) {
            return Err(RoomError::NotReady);
        }
        if inner.host.id == user.id {
            inner.ready.clear();
            inner.results.clear();
            inner.aborted.clear();
            Self::message_locked(&inner, Message::CancelGame { user: user.id });
            inner.phase = RoomPhase::SelectChart;
            Self::broadcast_locked(&inner, ServerCommand::ChangeState(Self::wire_state_of(&inner)));
            tracing::info!(room = %self.id, host = user.id, "round cancelled by host");
        } else {
            Self::message_locked(&inner, Message::CancelReady { user: user.id });
        }
        Ok(())
    }

    /// Accepts a fetched result for this round.
    pub fn played(&self, user: &User, record: Record) -> Result<(), RoomError> {
        let mut inner = self.inner.write();
        if inner.phase != RoomPhase::Playing {
            return Err(RoomError::WrongState);
        }
        if !inner.players.iter().any(|p| p.id == user.id) {
            return Err(RoomError::NotInRoom);
        }
        if record.player != user.id {
            return Err(RoomError::RecordPlayerMismatch);
        }
        if inner.aborted.contains(&user.id) {
            return Err(RoomError::AlreadyAborted);
        }
        if inner.results.contains_key(&user.id) {
            return Err(RoomError::AlreadyPlayed);
        }
        let record_id = record.id;
        Self::message_locked(
            &inner,
            Message::Played {
                user: user.id,
                score: record.score,
                accuracy: record.accuracy,
                full_combo: record.full_combo,
            },
        );
        inner.results.insert(user.id, record);
        self.replay.record_saved(&self.id, user.id, record_id);
        self.check_all_ready_locked(&mut inner);
        Ok(())
    }

    /// Marks the user as having given up this round.
    pub fn abort(&self, user: &User) -> Result<(), RoomError> {
        let mut inner = self.inner.write();
        if inner.phase != RoomPhase::Playing {
            return Err(RoomError::WrongState);
        }
        if !inner.players.iter().any(|p| p.id == user.id) {
            return Err(RoomError::NotInRoom);
        }
        if inner.results.contains_key(&user.id) {
            return Err(RoomError::AlreadyPlayed);
        }
        if !inner.aborted.insert(user.id) {
            return Err(RoomError::AlreadyAborted);
        }
        Self::message_locked(&inner, Message::Abort { user: user.id });
        self.check_all_ready_locked(&mut inner);
        Ok(())
    }

    // -- Scheduler ---------------------------------------------------------

    /// Advances the round when everyone is accounted for: all players ready
    /// in `WaitForReady`, or every player settled (result or abort) in
    /// `Playing`.
    fn check_all_ready_locked(&self, inner: &mut RoomInner) {
        match inner.phase {
            RoomPhase::WaitForReady => {
                let all_ready = !inner.players.is_empty()
                    && inner.players.iter().all(|p| inner.ready.contains(&p.id));
                if !all_ready {
                    return;
                }
                inner.results.clear();
                inner.aborted.clear();
                Self::message_locked(inner, Message::StartPlaying);
                for player in &inner.players {
                    player.reset_game_time();
                }
                inner.phase = RoomPhase::Playing;
                Self::broadcast_locked(inner, ServerCommand::ChangeState(RoomState::Playing));
                let roster: Vec<i32> = inner.players.iter().map(|p| p.id).collect();
                self.replay
                    .round_started(&self.id, inner.chart.as_ref().map(|c| c.id), &roster);
                tracing::info!(room = %self.id, players = roster.len(), "round started");
            }
            RoomPhase::Playing => {
                let all_settled = !inner.players.is_empty()
                    && inner.players.iter().all(|p| {
                        inner.results.contains_key(&p.id) || inner.aborted.contains(&p.id)
                    });
                if !all_settled {
                    return;
                }
                Self::message_locked(inner, Message::GameEnd);
                self.replay.round_stopped(&self.id);
                inner.ready.clear();
                inner.results.clear();
                inner.aborted.clear();
                inner.phase = RoomPhase::SelectChart;
                if self.is_cycle() {
                    self.cycle_host_locked(inner);
                }
                Self::broadcast_locked(inner, ServerCommand::ChangeState(Self::wire_state_of(inner)));
                tracing::info!(room = %self.id, "round settled");
            }
            RoomPhase::SelectChart => {}
        }
    }

    /// Rotates the host to the next player in join order, wrapping.
    fn cycle_host_locked(&self, inner: &mut RoomInner) {
        let old = Arc::clone(&inner.host);
        let idx = inner
            .players
            .iter()
            .position(|p| p.id == old.id)
            .unwrap_or(0);
        let new_host = Arc::clone(&inner.players[(idx + 1) % inner.players.len()]);
        inner.host = Arc::clone(&new_host);
        Self::message_locked(inner, Message::NewHost { user: new_host.id });
        old.send(ServerCommand::ChangeHost(false));
        new_host.send(ServerCommand::ChangeHost(true));
        tracing::info!(room = %self.id, from = old.id, to = new_host.id, "host rotated");
    }
}
