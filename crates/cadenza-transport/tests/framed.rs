//! Integration tests for the framed transport over in-memory duplex pipes.

use std::time::Duration;

use tokio::io::AsyncWriteExt;

use cadenza_protocol::{encode, ClientCommand, RoomId, ServerCommand};
use cadenza_transport::{ClientStream, ServerStream, PROTOCOL_VERSION};

/// Frames a payload the way a conforming peer would.
fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 5);
    let mut len = payload.len() as u32;
    loop {
        let mut byte = (len & 0x7f) as u8;
        len >>= 7;
        if len != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
    out.extend_from_slice(payload);
    out
}

async fn recv_or_timeout<T>(rx: &mut tokio::sync::mpsc::Receiver<T>) -> Option<T> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("receive timed out")
}

// =========================================================================
// Handshake and basic exchange
// =========================================================================

#[tokio::test]
async fn test_version_byte_reaches_server() {
    let (client_io, server_io) = tokio::io::duplex(4096);

    let accept = tokio::spawn(ServerStream::accept(server_io));
    let (_client, _from_server) = ClientStream::connect(client_io, PROTOCOL_VERSION)
        .await
        .expect("connect");
    let (server, _from_client) = accept.await.unwrap().expect("accept");

    assert_eq!(server.version(), PROTOCOL_VERSION);
}

#[tokio::test]
async fn test_commands_flow_both_directions() {
    let (client_io, server_io) = tokio::io::duplex(4096);

    let accept = tokio::spawn(ServerStream::accept(server_io));
    let (client, mut from_server) = ClientStream::connect(client_io, 1).await.unwrap();
    let (server, mut from_client) = accept.await.unwrap().unwrap();

    client.send(ClientCommand::Ping).await.unwrap();
    assert_eq!(recv_or_timeout(&mut from_client).await, Some(ClientCommand::Ping));

    server.send(ServerCommand::Pong).await.unwrap();
    assert_eq!(recv_or_timeout(&mut from_server).await, Some(ServerCommand::Pong));
}

#[tokio::test]
async fn test_command_sequence_survives_tiny_chunks() {
    // A 1-byte duplex buffer forces maximal fragmentation: every frame is
    // delivered byte by byte. The decoded sequence must be unaffected.
    let (client_io, server_io) = tokio::io::duplex(1);

    let accept = tokio::spawn(ServerStream::accept(server_io));
    let (client, _from_server) = ClientStream::connect(client_io, 1).await.unwrap();
    let (_server, mut from_client) = accept.await.unwrap().unwrap();

    let sent = vec![
        ClientCommand::Ping,
        ClientCommand::Chat { message: "chunked delivery".into() },
        ClientCommand::CreateRoom { id: RoomId::new("frag-1").unwrap() },
        ClientCommand::Ready,
    ];
    for cmd in &sent {
        client.send(cmd.clone()).await.unwrap();
    }

    for expected in &sent {
        assert_eq!(recv_or_timeout(&mut from_client).await.as_ref(), Some(expected));
    }
}

#[tokio::test]
async fn test_concatenated_frames_in_one_write() {
    let (mut raw, server_io) = tokio::io::duplex(4096);

    let accept = tokio::spawn(ServerStream::accept(server_io));

    // Version byte plus two frames in a single write.
    let mut bytes = vec![1u8];
    bytes.extend(frame(&encode(&ClientCommand::Ping)));
    bytes.extend(frame(&encode(&ClientCommand::Abort)));
    raw.write_all(&bytes).await.unwrap();

    let (_server, mut from_client) = accept.await.unwrap().unwrap();
    assert_eq!(recv_or_timeout(&mut from_client).await, Some(ClientCommand::Ping));
    assert_eq!(recv_or_timeout(&mut from_client).await, Some(ClientCommand::Abort));
}

// =========================================================================
// Fatal inputs
// =========================================================================

#[tokio::test]
async fn test_oversize_frame_ends_stream() {
    let (mut raw, server_io) = tokio::io::duplex(4096);
    let accept = tokio::spawn(ServerStream::accept(server_io));

    // Version byte, then a header announcing 2 MiB + 1.
    let mut bytes = vec![1u8];
    let mut len: u32 = 2 * 1024 * 1024 + 1;
    loop {
        let mut b = (len & 0x7f) as u8;
        len >>= 7;
        if len != 0 {
            b |= 0x80;
        }
        bytes.push(b);
        if len == 0 {
            break;
        }
    }
    raw.write_all(&bytes).await.unwrap();

    let (_server, mut from_client) = accept.await.unwrap().unwrap();
    assert_eq!(recv_or_timeout(&mut from_client).await, None);
}

#[tokio::test]
async fn test_runaway_length_prefix_ends_stream() {
    let (mut raw, server_io) = tokio::io::duplex(4096);
    let accept = tokio::spawn(ServerStream::accept(server_io));

    // Six continuation bytes: the length shift exceeds the u32 domain.
    raw.write_all(&[1, 0x80, 0x80, 0x80, 0x80, 0x80, 0x01])
        .await
        .unwrap();

    let (_server, mut from_client) = accept.await.unwrap().unwrap();
    assert_eq!(recv_or_timeout(&mut from_client).await, None);
}

#[tokio::test]
async fn test_undecodable_frame_ends_stream() {
    let (mut raw, server_io) = tokio::io::duplex(4096);
    let accept = tokio::spawn(ServerStream::accept(server_io));

    // A frame whose payload carries an unknown command tag.
    let mut bytes = vec![1u8];
    bytes.extend(frame(&[0xff]));
    raw.write_all(&bytes).await.unwrap();

    let (_server, mut from_client) = accept.await.unwrap().unwrap();
    assert_eq!(recv_or_timeout(&mut from_client).await, None);
}

#[tokio::test]
async fn test_peer_drop_ends_stream() {
    let (client_io, server_io) = tokio::io::duplex(4096);
    let accept = tokio::spawn(ServerStream::accept(server_io));
    let (client, _from_server) = ClientStream::connect(client_io, 1).await.unwrap();
    let (_server, mut from_client) = accept.await.unwrap().unwrap();

    client.shutdown();
    assert_eq!(recv_or_timeout(&mut from_client).await, None);
}

#[tokio::test]
async fn test_send_after_shutdown_reports_closed() {
    let (client_io, server_io) = tokio::io::duplex(4096);
    let accept = tokio::spawn(ServerStream::accept(server_io));
    let (_client, _from_server) = ClientStream::connect(client_io, 1).await.unwrap();
    let (server, _from_client) = accept.await.unwrap().unwrap();

    server.shutdown();
    // The writer task is gone; the queue may accept a few frames before the
    // channel closes, but it must eventually report Closed.
    let mut closed = false;
    for _ in 0..2048 {
        if server.try_send(ServerCommand::Pong).is_err() {
            closed = true;
            break;
        }
    }
    assert!(closed, "sends should fail once the writer is gone");
}
