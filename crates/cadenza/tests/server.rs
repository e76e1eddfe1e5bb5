//! End-to-end tests: real TCP connections against a running server with a
//! mock web API standing in for the identity/chart/record service.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc::Receiver;
use tokio::time::timeout;

use cadenza::prelude::*;

// =========================================================================
// Mock web API
// =========================================================================

/// Tokens look like `u<id>`; record id `100 + p` belongs to player `p`;
/// chart 404 does not exist.
struct MockApi;

#[async_trait::async_trait]
impl WebApi for MockApi {
    async fn me(&self, token: &str) -> Result<Profile, SessionError> {
        let id: i32 = token
            .strip_prefix('u')
            .and_then(|rest| rest.parse().ok())
            .ok_or(SessionError::AuthFailed)?;
        Ok(Profile {
            id,
            name: format!("player-{id}"),
            language: "en".into(),
        })
    }

    async fn chart(&self, id: i32) -> Result<Chart, SessionError> {
        if id == 404 {
            return Err(SessionError::ChartNotFound);
        }
        Ok(Chart {
            id,
            name: format!("chart-{id}"),
        })
    }

    async fn record(&self, id: i32) -> Result<Record, SessionError> {
        if id < 100 {
            return Err(SessionError::RecordNotFound);
        }
        Ok(Record {
            id,
            player: id - 100,
            score: 900_000 + id,
            perfect: 100,
            good: 2,
            bad: 0,
            miss: 1,
            max_combo: 102,
            accuracy: 0.981,
            full_combo: false,
            std: 0.0,
            std_score: 0.0,
        })
    }
}

// =========================================================================
// Harness
// =========================================================================

fn test_config() -> ServerConfig {
    ServerConfig {
        live_mode: true,
        monitors: HashSet::from([100]),
        // Compressed windows so disconnect scenarios run in test time.
        dangle_grace: Duration::from_millis(400),
        idle_timeout: Duration::from_secs(5),
        ..ServerConfig::default()
    }
}

async fn start_with(config: ServerConfig) -> (SocketAddr, ServerHandle) {
    let server = Server::builder()
        .config(config)
        .bind("127.0.0.1:0")
        .api(MockApi)
        .build()
        .await
        .expect("server should build");
    let addr = server.local_addr().expect("bound address");
    let handle = server.handle();
    tokio::spawn(server.run());
    (addr, handle)
}

async fn start() -> (SocketAddr, ServerHandle) {
    start_with(test_config()).await
}

async fn connect(addr: SocketAddr) -> (ClientStream, Receiver<ServerCommand>) {
    let socket = TcpStream::connect(addr).await.expect("connect");
    socket.set_nodelay(true).expect("nodelay");
    ClientStream::connect(socket, PROTOCOL_VERSION)
        .await
        .expect("handshake")
}

/// Receives until `pred` matches, skipping unrelated traffic. Panics after
/// three seconds.
async fn expect(
    rx: &mut Receiver<ServerCommand>,
    what: &str,
    pred: impl Fn(&ServerCommand) -> bool,
) -> ServerCommand {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let now = tokio::time::Instant::now();
        let left = deadline.checked_duration_since(now).unwrap_or_default();
        match timeout(left, rx.recv()).await {
            Ok(Some(cmd)) if pred(&cmd) => return cmd,
            Ok(Some(_)) => continue,
            Ok(None) => panic!("stream closed while waiting for {what}"),
            Err(_) => panic!("timed out waiting for {what}"),
        }
    }
}

/// Collects whatever arrives within `window`.
async fn drain(rx: &mut Receiver<ServerCommand>, window: Duration) -> Vec<ServerCommand> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Some(left) = deadline.checked_duration_since(tokio::time::Instant::now()) {
        if left.is_zero() {
            break;
        }
        match timeout(left, rx.recv()).await {
            Ok(Some(cmd)) => seen.push(cmd),
            Ok(None) | Err(_) => break,
        }
    }
    seen
}

async fn auth(
    client: &ClientStream,
    rx: &mut Receiver<ServerCommand>,
    token: &str,
) -> AuthInfo {
    client
        .send(ClientCommand::Authenticate { token: token.into() })
        .await
        .expect("send auth");
    let cmd = expect(rx, "auth response", |c| {
        matches!(c, ServerCommand::Authenticate(_))
    })
    .await;
    match cmd {
        ServerCommand::Authenticate(Ok(info)) => info,
        ServerCommand::Authenticate(Err(e)) => panic!("authentication rejected: {e}"),
        _ => unreachable!(),
    }
}

fn rid(s: &str) -> RoomId {
    RoomId::new(s).unwrap()
}

// =========================================================================
// Connection basics
// =========================================================================

#[tokio::test]
async fn test_ping_works_before_authentication() {
    let (addr, _handle) = start().await;
    let (client, mut rx) = connect(addr).await;

    client.send(ClientCommand::Ping).await.unwrap();
    expect(&mut rx, "pong", |c| matches!(c, ServerCommand::Pong)).await;
}

#[tokio::test]
async fn test_other_commands_before_authentication_close_the_session() {
    let (addr, _handle) = start().await;
    let (client, mut rx) = connect(addr).await;

    client
        .send(ClientCommand::Chat { message: "hi".into() })
        .await
        .unwrap();

    let closed = timeout(Duration::from_secs(3), rx.recv()).await;
    assert_eq!(closed.expect("should close, not hang"), None);
}

#[tokio::test]
async fn test_bad_token_rejected_but_session_survives() {
    let (addr, _handle) = start().await;
    let (client, mut rx) = connect(addr).await;

    client
        .send(ClientCommand::Authenticate { token: "nope".into() })
        .await
        .unwrap();
    let reply = expect(&mut rx, "auth error", |c| {
        matches!(c, ServerCommand::Authenticate(_))
    })
    .await;
    assert_eq!(
        reply,
        ServerCommand::Authenticate(Err("authentication failed".into()))
    );

    // The session is still unauthenticated but alive.
    client.send(ClientCommand::Ping).await.unwrap();
    expect(&mut rx, "pong", |c| matches!(c, ServerCommand::Pong)).await;
}

#[tokio::test]
async fn test_authentication_returns_identity_without_room() {
    let (addr, _handle) = start().await;
    let (client, mut rx) = connect(addr).await;

    let info = auth(&client, &mut rx, "u7").await;
    assert_eq!(info.user.id, 7);
    assert_eq!(info.user.name, "player-7");
    assert!(info.room.is_none());
}

#[tokio::test]
async fn test_idle_connection_is_dropped() {
    let config = ServerConfig {
        idle_timeout: Duration::from_secs(1),
        ..test_config()
    };
    let (addr, _handle) = start_with(config).await;
    let (client, mut rx) = connect(addr).await;
    auth(&client, &mut rx, "u1").await;

    // No pings: the watchdog must kill the connection.
    let closed = timeout(Duration::from_secs(4), rx.recv()).await;
    assert_eq!(closed.expect("should be dropped, not hang"), None);
}

// =========================================================================
// Full round with two players
// =========================================================================

#[tokio::test]
async fn test_full_round_two_players() {
    let (addr, _handle) = start().await;

    let (alice, mut arx) = connect(addr).await;
    auth(&alice, &mut arx, "u1").await;
    alice
        .send(ClientCommand::CreateRoom { id: rid("r1") })
        .await
        .unwrap();
    expect(&mut arx, "create message", |c| {
        matches!(c, ServerCommand::Message(Message::CreateRoom { user: 1 }))
    })
    .await;
    expect(&mut arx, "create ok", |c| {
        matches!(c, ServerCommand::CreateRoom(Ok(())))
    })
    .await;

    let (bob, mut brx) = connect(addr).await;
    auth(&bob, &mut brx, "u2").await;
    bob.send(ClientCommand::JoinRoom {
        id: rid("r1"),
        monitor: false,
    })
    .await
    .unwrap();

    // Alice sees the join fan-out; bob gets his response.
    expect(&mut arx, "peer joined", |c| {
        matches!(c, ServerCommand::OnJoinRoom(UserInfo { id: 2, .. }))
    })
    .await;
    let joined = expect(&mut brx, "join ok", |c| {
        matches!(c, ServerCommand::JoinRoom(_))
    })
    .await;
    match joined {
        ServerCommand::JoinRoom(Ok(JoinResponse { state, users, live })) => {
            assert_eq!(state, RoomState::SelectChart(None));
            assert_eq!(users.len(), 2);
            assert!(!live);
        }
        other => panic!("expected join ok, got {other:?}"),
    }

    // Host picks a chart; everyone sees the message and the state change.
    alice
        .send(ClientCommand::SelectChart { id: 42 })
        .await
        .unwrap();
    expect(&mut brx, "chart message", |c| {
        matches!(
            c,
            ServerCommand::Message(Message::SelectChart { user: 1, id: 42, .. })
        )
    })
    .await;
    expect(&mut brx, "chart state", |c| {
        matches!(c, ServerCommand::ChangeState(RoomState::SelectChart(Some(42))))
    })
    .await;
    expect(&mut arx, "chart ok", |c| {
        matches!(c, ServerCommand::SelectChart(Ok(())))
    })
    .await;

    // Host requests the start; the room waits for bob.
    alice.send(ClientCommand::RequestStart).await.unwrap();
    expect(&mut brx, "game start", |c| {
        matches!(c, ServerCommand::Message(Message::GameStart { user: 1 }))
    })
    .await;
    expect(&mut brx, "waiting state", |c| {
        matches!(c, ServerCommand::ChangeState(RoomState::WaitingForReady))
    })
    .await;
    expect(&mut arx, "start ok", |c| {
        matches!(c, ServerCommand::RequestStart(Ok(())))
    })
    .await;

    // Bob readies up: the round begins.
    bob.send(ClientCommand::Ready).await.unwrap();
    expect(&mut arx, "start playing", |c| {
        matches!(c, ServerCommand::Message(Message::StartPlaying))
    })
    .await;
    expect(&mut arx, "playing state", |c| {
        matches!(c, ServerCommand::ChangeState(RoomState::Playing))
    })
    .await;
    expect(&mut brx, "ready ok", |c| {
        matches!(c, ServerCommand::Ready(Ok(())))
    })
    .await;

    // Alice uploads a result, bob gives up: the round settles.
    alice
        .send(ClientCommand::Played { id: 101 })
        .await
        .unwrap();
    expect(&mut brx, "played message", |c| {
        matches!(c, ServerCommand::Message(Message::Played { user: 1, .. }))
    })
    .await;
    expect(&mut arx, "played ok", |c| {
        matches!(c, ServerCommand::Played(Ok(())))
    })
    .await;

    bob.send(ClientCommand::Abort).await.unwrap();
    expect(&mut arx, "abort message", |c| {
        matches!(c, ServerCommand::Message(Message::Abort { user: 2 }))
    })
    .await;
    expect(&mut arx, "game end", |c| {
        matches!(c, ServerCommand::Message(Message::GameEnd))
    })
    .await;
    expect(&mut arx, "back to selection", |c| {
        matches!(c, ServerCommand::ChangeState(RoomState::SelectChart(Some(42))))
    })
    .await;
    expect(&mut brx, "abort ok", |c| {
        matches!(c, ServerCommand::Abort(Ok(())))
    })
    .await;
}

// =========================================================================
// Host departure during chart selection
// =========================================================================

#[tokio::test]
async fn test_host_leave_hands_room_to_remaining_player() {
    let (addr, _handle) = start().await;

    let (alice, mut arx) = connect(addr).await;
    auth(&alice, &mut arx, "u1").await;
    alice
        .send(ClientCommand::CreateRoom { id: rid("r2") })
        .await
        .unwrap();
    expect(&mut arx, "create ok", |c| {
        matches!(c, ServerCommand::CreateRoom(Ok(())))
    })
    .await;

    let (bob, mut brx) = connect(addr).await;
    auth(&bob, &mut brx, "u2").await;
    bob.send(ClientCommand::JoinRoom {
        id: rid("r2"),
        monitor: false,
    })
    .await
    .unwrap();
    expect(&mut brx, "join ok", |c| {
        matches!(c, ServerCommand::JoinRoom(Ok(_)))
    })
    .await;

    alice.send(ClientCommand::LeaveRoom).await.unwrap();
    expect(&mut arx, "leave ok", |c| {
        matches!(c, ServerCommand::LeaveRoom(Ok(())))
    })
    .await;

    // Bob observes the departure and his own promotion.
    expect(&mut brx, "leave message", |c| {
        matches!(c, ServerCommand::Message(Message::LeaveRoom { user: 1, .. }))
    })
    .await;
    expect(&mut brx, "new host message", |c| {
        matches!(c, ServerCommand::Message(Message::NewHost { user: 2 }))
    })
    .await;
    expect(&mut brx, "host grant", |c| {
        matches!(c, ServerCommand::ChangeHost(true))
    })
    .await;

    // And the promotion is real: bob may now select charts.
    bob.send(ClientCommand::SelectChart { id: 7 }).await.unwrap();
    expect(&mut brx, "chart ok", |c| {
        matches!(c, ServerCommand::SelectChart(Ok(())))
    })
    .await;
}

// =========================================================================
// Reconnect inside the dangle window
// =========================================================================

#[tokio::test]
async fn test_reconnect_preserves_room_membership() {
    let (addr, _handle) = start().await;

    let (alice, mut arx) = connect(addr).await;
    auth(&alice, &mut arx, "u1").await;
    alice
        .send(ClientCommand::CreateRoom { id: rid("keep") })
        .await
        .unwrap();
    expect(&mut arx, "create ok", |c| {
        matches!(c, ServerCommand::CreateRoom(Ok(())))
    })
    .await;

    let (bob, mut brx) = connect(addr).await;
    auth(&bob, &mut brx, "u2").await;
    bob.send(ClientCommand::JoinRoom {
        id: rid("keep"),
        monitor: false,
    })
    .await
    .unwrap();
    expect(&mut brx, "join ok", |c| {
        matches!(c, ServerCommand::JoinRoom(Ok(_)))
    })
    .await;

    // Alice's TCP drops without ceremony.
    alice.shutdown();
    drop(arx);

    // She reconnects well inside the dangle window and re-authenticates.
    let (alice2, mut arx2) = connect(addr).await;
    let info = auth(&alice2, &mut arx2, "u1").await;

    let room = info.room.expect("room must survive the reconnect");
    assert_eq!(room.id, rid("keep"));
    assert!(room.is_host);
    assert_eq!(room.users.len(), 2);
    assert!(room.users.contains_key(&1) && room.users.contains_key(&2));

    // Nobody saw alice leave.
    let seen = drain(&mut brx, Duration::from_millis(700)).await;
    assert!(
        !seen
            .iter()
            .any(|c| matches!(c, ServerCommand::Message(Message::LeaveRoom { user: 1, .. }))),
        "no LeaveRoom may be emitted for a reconnecting user, got {seen:?}"
    );

    // The revived session is fully functional as host.
    alice2
        .send(ClientCommand::SelectChart { id: 5 })
        .await
        .unwrap();
    expect(&mut arx2, "chart ok", |c| {
        matches!(c, ServerCommand::SelectChart(Ok(())))
    })
    .await;
}

// =========================================================================
// Silent death during play
// =========================================================================

#[tokio::test]
async fn test_silent_disconnect_mid_round_settles_after_dangle() {
    let (addr, _handle) = start().await;

    let (alice, mut arx) = connect(addr).await;
    auth(&alice, &mut arx, "u1").await;
    alice
        .send(ClientCommand::CreateRoom { id: rid("drop") })
        .await
        .unwrap();
    expect(&mut arx, "create ok", |c| {
        matches!(c, ServerCommand::CreateRoom(Ok(())))
    })
    .await;

    let (bob, mut brx) = connect(addr).await;
    auth(&bob, &mut brx, "u2").await;
    bob.send(ClientCommand::JoinRoom {
        id: rid("drop"),
        monitor: false,
    })
    .await
    .unwrap();
    expect(&mut brx, "join ok", |c| {
        matches!(c, ServerCommand::JoinRoom(Ok(_)))
    })
    .await;

    alice.send(ClientCommand::SelectChart { id: 1 }).await.unwrap();
    expect(&mut arx, "chart ok", |c| {
        matches!(c, ServerCommand::SelectChart(Ok(())))
    })
    .await;
    alice.send(ClientCommand::RequestStart).await.unwrap();
    expect(&mut brx, "waiting state", |c| {
        matches!(c, ServerCommand::ChangeState(RoomState::WaitingForReady))
    })
    .await;
    bob.send(ClientCommand::Ready).await.unwrap();
    expect(&mut arx, "playing", |c| {
        matches!(c, ServerCommand::ChangeState(RoomState::Playing))
    })
    .await;

    // Alice finishes; bob's machine dies silently.
    alice
        .send(ClientCommand::Played { id: 101 })
        .await
        .unwrap();
    expect(&mut arx, "played ok", |c| {
        matches!(c, ServerCommand::Played(Ok(())))
    })
    .await;
    bob.shutdown();
    drop(brx);

    // After the dangle window bob counts as aborted and the round ends.
    expect(&mut arx, "implicit abort", |c| {
        matches!(c, ServerCommand::Message(Message::Abort { user: 2 }))
    })
    .await;
    expect(&mut arx, "game end", |c| {
        matches!(c, ServerCommand::Message(Message::GameEnd))
    })
    .await;
    expect(&mut arx, "back to selection", |c| {
        matches!(c, ServerCommand::ChangeState(RoomState::SelectChart(Some(1))))
    })
    .await;
}

// =========================================================================
// Player cap
// =========================================================================

#[tokio::test]
async fn test_ninth_join_is_rejected() {
    let (addr, _handle) = start().await;

    let (host, mut hrx) = connect(addr).await;
    auth(&host, &mut hrx, "u1").await;
    host.send(ClientCommand::CreateRoom { id: rid("big") })
        .await
        .unwrap();
    expect(&mut hrx, "create ok", |c| {
        matches!(c, ServerCommand::CreateRoom(Ok(())))
    })
    .await;

    let mut clients = Vec::new();
    for id in 2..=8 {
        let (client, mut rx) = connect(addr).await;
        auth(&client, &mut rx, &format!("u{id}")).await;
        client
            .send(ClientCommand::JoinRoom {
                id: rid("big"),
                monitor: false,
            })
            .await
            .unwrap();
        expect(&mut rx, "join ok", |c| {
            matches!(c, ServerCommand::JoinRoom(Ok(_)))
        })
        .await;
        clients.push((client, rx));
    }

    let (ninth, mut nrx) = connect(addr).await;
    auth(&ninth, &mut nrx, "u9").await;
    ninth
        .send(ClientCommand::JoinRoom {
            id: rid("big"),
            monitor: false,
        })
        .await
        .unwrap();
    let reply = expect(&mut nrx, "join rejection", |c| {
        matches!(c, ServerCommand::JoinRoom(_))
    })
    .await;
    assert_eq!(reply, ServerCommand::JoinRoom(Err("room is full".into())));
}

// =========================================================================
// Rooms, monitors, chat, admin surface
// =========================================================================

#[tokio::test]
async fn test_duplicate_room_id_rejected() {
    let (addr, _handle) = start().await;

    let (alice, mut arx) = connect(addr).await;
    auth(&alice, &mut arx, "u1").await;
    alice
        .send(ClientCommand::CreateRoom { id: rid("taken") })
        .await
        .unwrap();
    expect(&mut arx, "create ok", |c| {
        matches!(c, ServerCommand::CreateRoom(Ok(())))
    })
    .await;

    let (bob, mut brx) = connect(addr).await;
    auth(&bob, &mut brx, "u2").await;
    bob.send(ClientCommand::CreateRoom { id: rid("taken") })
        .await
        .unwrap();
    let reply = expect(&mut brx, "create rejection", |c| {
        matches!(c, ServerCommand::CreateRoom(_))
    })
    .await;
    assert_eq!(
        reply,
        ServerCommand::CreateRoom(Err("room id already taken".into()))
    );
}

#[tokio::test]
async fn test_room_creation_kill_switch() {
    let (addr, handle) = start().await;
    handle.set_room_creation_enabled(false);

    let (alice, mut arx) = connect(addr).await;
    auth(&alice, &mut arx, "u1").await;
    alice
        .send(ClientCommand::CreateRoom { id: rid("nope") })
        .await
        .unwrap();
    let reply = expect(&mut arx, "create rejection", |c| {
        matches!(c, ServerCommand::CreateRoom(_))
    })
    .await;
    assert_eq!(
        reply,
        ServerCommand::CreateRoom(Err("room creation is disabled".into()))
    );

    handle.set_room_creation_enabled(true);
    alice
        .send(ClientCommand::CreateRoom { id: rid("nope") })
        .await
        .unwrap();
    expect(&mut arx, "create ok", |c| {
        matches!(c, ServerCommand::CreateRoom(Ok(())))
    })
    .await;
}

#[tokio::test]
async fn test_unlisted_user_cannot_monitor() {
    let (addr, _handle) = start().await;

    let (alice, mut arx) = connect(addr).await;
    auth(&alice, &mut arx, "u1").await;
    alice
        .send(ClientCommand::CreateRoom { id: rid("m") })
        .await
        .unwrap();
    expect(&mut arx, "create ok", |c| {
        matches!(c, ServerCommand::CreateRoom(Ok(())))
    })
    .await;

    let (bob, mut brx) = connect(addr).await;
    auth(&bob, &mut brx, "u2").await;
    bob.send(ClientCommand::JoinRoom {
        id: rid("m"),
        monitor: true,
    })
    .await
    .unwrap();
    let reply = expect(&mut brx, "monitor rejection", |c| {
        matches!(c, ServerCommand::JoinRoom(_))
    })
    .await;
    assert_eq!(
        reply,
        ServerCommand::JoinRoom(Err("monitoring not allowed".into()))
    );
}

#[tokio::test]
async fn test_monitor_receives_live_frames_players_do_not() {
    let (addr, _handle) = start().await;

    let (alice, mut arx) = connect(addr).await;
    auth(&alice, &mut arx, "u1").await;
    alice
        .send(ClientCommand::CreateRoom { id: rid("live") })
        .await
        .unwrap();
    expect(&mut arx, "create ok", |c| {
        matches!(c, ServerCommand::CreateRoom(Ok(())))
    })
    .await;

    let (bob, mut brx) = connect(addr).await;
    auth(&bob, &mut brx, "u2").await;
    bob.send(ClientCommand::JoinRoom {
        id: rid("live"),
        monitor: false,
    })
    .await
    .unwrap();
    expect(&mut brx, "join ok", |c| {
        matches!(c, ServerCommand::JoinRoom(Ok(_)))
    })
    .await;

    // User 100 is on the monitor list.
    let (watcher, mut wrx) = connect(addr).await;
    auth(&watcher, &mut wrx, "u100").await;
    watcher
        .send(ClientCommand::JoinRoom {
            id: rid("live"),
            monitor: true,
        })
        .await
        .unwrap();
    let joined = expect(&mut wrx, "monitor join ok", |c| {
        matches!(c, ServerCommand::JoinRoom(_))
    })
    .await;
    match joined {
        ServerCommand::JoinRoom(Ok(JoinResponse { live, .. })) => assert!(live),
        other => panic!("expected monitor join ok, got {other:?}"),
    }

    // Run the room into Playing.
    alice.send(ClientCommand::SelectChart { id: 1 }).await.unwrap();
    alice.send(ClientCommand::RequestStart).await.unwrap();
    expect(&mut brx, "waiting state", |c| {
        matches!(c, ServerCommand::ChangeState(RoomState::WaitingForReady))
    })
    .await;
    bob.send(ClientCommand::Ready).await.unwrap();
    expect(&mut brx, "playing", |c| {
        matches!(c, ServerCommand::ChangeState(RoomState::Playing))
    })
    .await;

    // Bob streams touches; only the monitor sees them.
    bob.send(ClientCommand::Touches {
        frames: vec![TouchFrame {
            time: 3.5,
            points: vec![TouchPoint {
                id: 0,
                pos: CompactPos::new(0.25, -0.5),
            }],
        }],
    })
    .await
    .unwrap();

    let frames = expect(&mut wrx, "forwarded touches", |c| {
        matches!(c, ServerCommand::Touches { player: 2, .. })
    })
    .await;
    match frames {
        ServerCommand::Touches { frames, .. } => {
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].time, 3.5);
        }
        _ => unreachable!(),
    }

    let alice_saw = drain(&mut arx, Duration::from_millis(300)).await;
    assert!(
        !alice_saw
            .iter()
            .any(|c| matches!(c, ServerCommand::Touches { .. })),
        "players must not receive touch frames, got {alice_saw:?}"
    );
}

#[tokio::test]
async fn test_chat_fans_out_to_room() {
    let (addr, _handle) = start().await;

    let (alice, mut arx) = connect(addr).await;
    auth(&alice, &mut arx, "u1").await;

    // Chatting outside a room is refused.
    alice
        .send(ClientCommand::Chat { message: "anyone?".into() })
        .await
        .unwrap();
    let reply = expect(&mut arx, "chat rejection", |c| {
        matches!(c, ServerCommand::Chat(_))
    })
    .await;
    assert_eq!(reply, ServerCommand::Chat(Err("not in room".into())));

    alice
        .send(ClientCommand::CreateRoom { id: rid("chatty") })
        .await
        .unwrap();
    expect(&mut arx, "create ok", |c| {
        matches!(c, ServerCommand::CreateRoom(Ok(())))
    })
    .await;

    let (bob, mut brx) = connect(addr).await;
    auth(&bob, &mut brx, "u2").await;
    bob.send(ClientCommand::JoinRoom {
        id: rid("chatty"),
        monitor: false,
    })
    .await
    .unwrap();
    expect(&mut brx, "join ok", |c| {
        matches!(c, ServerCommand::JoinRoom(Ok(_)))
    })
    .await;

    alice
        .send(ClientCommand::Chat { message: "glhf".into() })
        .await
        .unwrap();
    let msg = expect(&mut brx, "chat message", |c| {
        matches!(c, ServerCommand::Message(Message::Chat { user: 1, .. }))
    })
    .await;
    assert_eq!(
        msg,
        ServerCommand::Message(Message::Chat {
            user: 1,
            content: "glhf".into()
        })
    );
    expect(&mut arx, "chat ok", |c| {
        matches!(c, ServerCommand::Chat(Ok(())))
    })
    .await;
}

#[tokio::test]
async fn test_stats_reflect_registries() {
    let (addr, handle) = start().await;

    let (alice, mut arx) = connect(addr).await;
    auth(&alice, &mut arx, "u1").await;
    alice
        .send(ClientCommand::CreateRoom { id: rid("stats") })
        .await
        .unwrap();
    expect(&mut arx, "create ok", |c| {
        matches!(c, ServerCommand::CreateRoom(Ok(())))
    })
    .await;

    let (bob, mut brx) = connect(addr).await;
    auth(&bob, &mut brx, "u2").await;

    let stats = handle.stats();
    assert_eq!(stats.sessions, 2);
    assert_eq!(stats.users, 2);
    assert_eq!(stats.rooms, 1);
}

#[tokio::test]
async fn test_unknown_chart_is_reported_not_fatal() {
    let (addr, _handle) = start().await;

    let (alice, mut arx) = connect(addr).await;
    auth(&alice, &mut arx, "u1").await;
    alice
        .send(ClientCommand::CreateRoom { id: rid("c404") })
        .await
        .unwrap();
    expect(&mut arx, "create ok", |c| {
        matches!(c, ServerCommand::CreateRoom(Ok(())))
    })
    .await;

    alice
        .send(ClientCommand::SelectChart { id: 404 })
        .await
        .unwrap();
    let reply = expect(&mut arx, "chart rejection", |c| {
        matches!(c, ServerCommand::SelectChart(_))
    })
    .await;
    assert_eq!(
        reply,
        ServerCommand::SelectChart(Err("chart not found".into()))
    );

    // The session keeps working.
    alice.send(ClientCommand::Ping).await.unwrap();
    expect(&mut arx, "pong", |c| matches!(c, ServerCommand::Pong)).await;
}
