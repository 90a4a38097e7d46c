//! End-to-end tests against a real listener
//!
//! Drives the server over TCP under adverse client behaviour: silent
//! clients, truncated frames, garbage, connection floods and shutdown while
//! players are online.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use craft_protocol::config::{EngineConfig, PROTOCOL_VERSION};
use craft_protocol::core::codec::{Frame, FrameCodec};
use craft_protocol::core::wire::{PacketReader, WireWrite};
use craft_protocol::error::Result;
use craft_protocol::players::ChatMode;
use craft_protocol::protocol::message::ids;
use craft_protocol::protocol::{KeyExchange, ServerContext};
use craft_protocol::service::Server;
use craft_protocol::utils::crypto::CipherState;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::codec::{Decoder, Encoder, Framed};

const WAIT: Duration = Duration::from_secs(5);

struct Running {
    addr: SocketAddr,
    context: Arc<ServerContext>,
    shutdown: mpsc::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

async fn start(mutate: impl FnOnce(&mut EngineConfig)) -> Running {
    let config = EngineConfig::default_with_overrides(|c| {
        c.server.address = "127.0.0.1:0".to_string();
        c.server.shutdown_timeout = Duration::from_secs(2);
        mutate(c);
    });
    let server = Server::bind(config).await.expect("bind");
    let addr = server.local_addr().unwrap();
    let context = server.context().clone();
    let (shutdown, rx) = mpsc::channel(1);
    let handle = tokio::spawn(server.run_with_shutdown(rx));
    Running {
        addr,
        context,
        shutdown,
        handle,
    }
}

type Client = Framed<TcpStream, FrameCodec>;

async fn connect(addr: SocketAddr) -> Client {
    Framed::new(TcpStream::connect(addr).await.unwrap(), FrameCodec::default())
}

fn frame(id: i32, build: impl FnOnce(&mut BytesMut)) -> Frame {
    let mut buf = BytesMut::new();
    build(&mut buf);
    Frame::new(id, buf.freeze())
}

fn handshake(version: i32, intent: i32) -> Frame {
    frame(ids::HANDSHAKE, |b| {
        b.put_varint(version);
        b.put_string("127.0.0.1");
        b.put_u16(25565);
        b.put_varint(intent);
    })
}

async fn recv(client: &mut Client) -> Option<Frame> {
    match timeout(WAIT, client.next()).await.expect("server went quiet") {
        Some(Ok(frame)) => Some(frame),
        Some(Err(_)) | None => None,
    }
}

/// Wait for the server to hang up, skipping anything still in flight
async fn expect_closed(client: &mut Client) {
    timeout(WAIT, async {
        while let Some(Ok(_)) = client.next().await {}
    })
    .await
    .expect("connection stayed open");
}

async fn login(addr: SocketAddr, name: &str) -> Client {
    let mut client = connect(addr).await;
    client.send(handshake(PROTOCOL_VERSION, 2)).await.unwrap();
    client
        .send(frame(ids::LOGIN_START, |b| b.put_string(name)))
        .await
        .unwrap();

    let mut next = recv(&mut client).await.unwrap();
    if next.id == ids::LOGIN_SET_COMPRESSION {
        let threshold = PacketReader::new(next.payload).read_varint().unwrap();
        client
            .codec_mut()
            .enable_compression(threshold as usize, 6)
            .unwrap();
        next = recv(&mut client).await.unwrap();
    }

    assert_eq!(next.id, ids::LOGIN_SUCCESS);
    assert_eq!(recv(&mut client).await.unwrap().id, ids::PLAY_JOIN_GAME);
    client
}

fn settings() -> Frame {
    frame(ids::PLAY_CLIENT_SETTINGS, |b| {
        b.put_string("en_us");
        b.put_i8(10);
        b.put_varint(ChatMode::Enabled.to_wire());
        b.put_bool(true);
        b.put_u8(0x7F);
        b.put_varint(1);
    })
}

async fn send_settings(client: &mut Client) {
    client.send(settings()).await.unwrap();
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// Next chat line whose JSON contains `needle`
async fn recv_chat_containing(client: &mut Client, needle: &str) -> String {
    loop {
        let frame = recv(client).await.expect("closed before chat arrived");
        if frame.id != ids::PLAY_CHAT_CLIENTBOUND {
            continue;
        }
        let json = PacketReader::new(frame.payload).read_string(32767).unwrap();
        if json.contains(needle) {
            return json;
        }
    }
}

#[tokio::test]
async fn test_status_round_trip() {
    let server = start(|c| c.server.motd = "Chaos".to_string()).await;
    let mut client = connect(server.addr).await;

    client.send(handshake(PROTOCOL_VERSION, 1)).await.unwrap();
    client.send(frame(ids::STATUS_REQUEST, |_| {})).await.unwrap();
    let response = recv(&mut client).await.unwrap();
    assert_eq!(response.id, ids::STATUS_RESPONSE);
    let json = PacketReader::new(response.payload).read_string(32767).unwrap();
    assert!(json.contains("Chaos"));

    client
        .send(frame(ids::STATUS_PING, |b| b.put_i64(42)))
        .await
        .unwrap();
    let pong = recv(&mut client).await.unwrap();
    assert_eq!(pong.id, ids::STATUS_PONG);
    expect_closed(&mut client).await;
}

#[tokio::test]
async fn test_login_version_mismatch_gets_reason() {
    let server = start(|_| {}).await;
    let mut client = connect(server.addr).await;
    client.send(handshake(PROTOCOL_VERSION + 1, 2)).await.unwrap();

    let disconnect = recv(&mut client).await.unwrap();
    assert_eq!(disconnect.id, ids::LOGIN_DISCONNECT);
    let json = PacketReader::new(disconnect.payload).read_string(32767).unwrap();
    assert!(json.contains("Outdated server"));
    expect_closed(&mut client).await;
}

#[tokio::test]
async fn test_chat_between_players() {
    let server = start(|_| {}).await;
    let mut alice = login(server.addr, "Alice").await;
    let mut bob = login(server.addr, "Bob").await;
    send_settings(&mut alice).await;
    send_settings(&mut bob).await;

    let registry = server.context.registry.clone();
    wait_for(|| {
        ["Alice", "Bob"].iter().all(|name| {
            registry
                .find_by_name(name)
                .map(|p| p.has_settings())
                .unwrap_or(false)
        })
    })
    .await;

    alice
        .send(frame(ids::PLAY_CHAT_SERVERBOUND, |b| b.put_string("hi bob")))
        .await
        .unwrap();
    recv_chat_containing(&mut bob, "<Alice> hi bob").await;
    recv_chat_containing(&mut alice, "<Alice> hi bob").await;

    drop(bob);
    recv_chat_containing(&mut alice, "Bob left the game").await;
    wait_for(|| registry.len() == 1).await;
}

#[tokio::test]
async fn test_silent_client_times_out() {
    let server = start(|c| {
        c.server.keepalive_interval = Duration::from_millis(100);
        c.server.keepalive_timeout = Duration::from_millis(300);
    })
    .await;
    let mut client = login(server.addr, "Sleepy").await;

    let keepalive = recv(&mut client).await.unwrap();
    assert_eq!(keepalive.id, ids::PLAY_KEEPALIVE_CLIENTBOUND);
    expect_closed(&mut client).await;

    let registry = server.context.registry.clone();
    wait_for(|| registry.is_empty()).await;
}

#[tokio::test]
async fn test_answering_client_stays_connected() {
    let server = start(|c| {
        c.server.keepalive_interval = Duration::from_millis(100);
        c.server.keepalive_timeout = Duration::from_millis(300);
    })
    .await;
    let mut client = login(server.addr, "Awake").await;

    for _ in 0..6 {
        let keepalive = recv(&mut client).await.expect("dropped while answering");
        assert_eq!(keepalive.id, ids::PLAY_KEEPALIVE_CLIENTBOUND);
        let id = PacketReader::new(keepalive.payload).read_i64().unwrap();
        client
            .send(frame(ids::PLAY_KEEPALIVE_SERVERBOUND, |b| b.put_i64(id)))
            .await
            .unwrap();
    }
    assert_eq!(server.context.registry.len(), 1);
}

#[tokio::test]
async fn test_client_that_stops_reading_is_still_timed_out() {
    let server = start(|c| {
        c.server.keepalive_interval = Duration::from_secs(1);
        c.server.keepalive_timeout = Duration::from_secs(2);
        c.session.compression_threshold = None;
    })
    .await;
    let mut client = login(server.addr, "Stalled").await;
    send_settings(&mut client).await;

    // Every line is echoed back to a socket nobody reads, until the
    // server gives up on the connection
    let line = "x".repeat(200);
    let flood = tokio::spawn(async move {
        let started = Instant::now();
        while started.elapsed() < Duration::from_secs(6) {
            let chat = frame(ids::PLAY_CHAT_SERVERBOUND, |b| b.put_string(&line));
            if client.send(chat).await.is_err() {
                break;
            }
        }
        client
    });

    let registry = server.context.registry.clone();
    timeout(Duration::from_secs(10), async {
        while !registry.is_empty() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("stalled client was never dropped");

    // Other connections are still served
    let mut status = connect(server.addr).await;
    status.send(handshake(PROTOCOL_VERSION, 1)).await.unwrap();
    status.send(frame(ids::STATUS_REQUEST, |_| {})).await.unwrap();
    assert_eq!(recv(&mut status).await.unwrap().id, ids::STATUS_RESPONSE);

    drop(flood.await.unwrap());
}

/// Key exchange whose "private key" is the identity
struct EchoKeys;

impl KeyExchange for EchoKeys {
    fn public_key(&self) -> Bytes {
        Bytes::from_static(b"test-key")
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// Read one frame off a raw socket, decrypting what arrives when a cipher is set
async fn read_frame(
    raw: &mut TcpStream,
    codec: &mut FrameCodec,
    wire: &mut BytesMut,
    mut cipher: Option<&mut CipherState>,
) -> Frame {
    timeout(WAIT, async {
        loop {
            if let Some(frame) = codec.decode(wire).unwrap() {
                return frame;
            }
            let mut chunk = [0u8; 4096];
            let n = raw.read(&mut chunk).await.unwrap();
            assert!(n > 0, "server hung up");
            if let Some(cipher) = cipher.as_deref_mut() {
                cipher.apply(&mut chunk[..n]);
            }
            wire.extend_from_slice(&chunk[..n]);
        }
    })
    .await
    .expect("server went quiet")
}

#[tokio::test]
async fn test_online_login_over_tcp() {
    let config = EngineConfig::default_with_overrides(|c| {
        c.server.address = "127.0.0.1:0".to_string();
        c.session.online_mode = true;
        c.session.compression_threshold = None;
    });
    let context = ServerContext::new(config).with_key_exchange(Arc::new(EchoKeys));
    let server = Server::bind_with_context(context).await.expect("bind");
    let addr = server.local_addr().unwrap();
    let (shutdown, rx) = mpsc::channel(1);
    let handle = tokio::spawn(server.run_with_shutdown(rx));

    let mut raw = TcpStream::connect(addr).await.unwrap();
    let mut codec = FrameCodec::default();
    let mut wire = BytesMut::new();
    let mut out = BytesMut::new();
    codec.encode(handshake(PROTOCOL_VERSION, 2), &mut out).unwrap();
    codec
        .encode(frame(ids::LOGIN_START, |b| b.put_string("Secure")), &mut out)
        .unwrap();
    raw.write_all(&out).await.unwrap();

    let request = read_frame(&mut raw, &mut codec, &mut wire, None).await;
    assert_eq!(request.id, ids::LOGIN_ENCRYPTION_REQUEST);
    let mut reader = PacketReader::new(request.payload);
    reader.read_string(20).unwrap();
    assert_eq!(&reader.read_byte_array(1024).unwrap()[..], b"test-key");
    let token = reader.read_byte_array(16).unwrap();
    assert!(wire.is_empty());

    let secret = [0x5Au8; 16];
    let mut out = BytesMut::new();
    codec
        .encode(
            frame(ids::LOGIN_ENCRYPTION_RESPONSE, |b| {
                b.put_byte_array(&secret);
                b.put_byte_array(&token);
            }),
            &mut out,
        )
        .unwrap();
    raw.write_all(&out).await.unwrap();

    // Both directions are encrypted from here on
    let mut decryptor = CipherState::decryptor(&secret).unwrap();
    let mut encryptor = CipherState::encryptor(&secret).unwrap();
    let success = read_frame(&mut raw, &mut codec, &mut wire, Some(&mut decryptor)).await;
    assert_eq!(success.id, ids::LOGIN_SUCCESS);
    let join = read_frame(&mut raw, &mut codec, &mut wire, Some(&mut decryptor)).await;
    assert_eq!(join.id, ids::PLAY_JOIN_GAME);

    let mut out = BytesMut::new();
    codec.encode(settings(), &mut out).unwrap();
    codec
        .encode(
            frame(ids::PLAY_CHAT_SERVERBOUND, |b| b.put_string("hello")),
            &mut out,
        )
        .unwrap();
    encryptor.apply(&mut out);
    raw.write_all(&out).await.unwrap();

    loop {
        let frame = read_frame(&mut raw, &mut codec, &mut wire, Some(&mut decryptor)).await;
        if frame.id != ids::PLAY_CHAT_CLIENTBOUND {
            continue;
        }
        let json = PacketReader::new(frame.payload).read_string(32767).unwrap();
        if json.contains("<Secure> hello") {
            break;
        }
    }

    shutdown.send(()).await.unwrap();
    let result = timeout(WAIT, handle).await.expect("server hung");
    assert!(result.unwrap().is_ok());
}

#[tokio::test]
async fn test_truncated_frame_then_disconnect() {
    let server = start(|_| {}).await;
    {
        let mut raw = TcpStream::connect(server.addr).await.unwrap();
        // Declares 20 bytes, sends 3
        raw.write_all(&[0x14, 0x00, 0xD4, 0x02]).await.unwrap();
    }

    // The server keeps serving
    let mut client = connect(server.addr).await;
    client.send(handshake(PROTOCOL_VERSION, 1)).await.unwrap();
    client.send(frame(ids::STATUS_REQUEST, |_| {})).await.unwrap();
    assert_eq!(recv(&mut client).await.unwrap().id, ids::STATUS_RESPONSE);
}

#[tokio::test]
async fn test_garbage_closes_connection() {
    let server = start(|_| {}).await;
    let mut raw = TcpStream::connect(server.addr).await.unwrap();
    raw.write_all(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01])
        .await
        .unwrap();

    let mut buf = [0u8; 64];
    let read = timeout(WAIT, raw.read(&mut buf)).await.expect("still open");
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn test_connection_limit() {
    let server = start(|c| {
        c.server.max_connections = 1;
        c.server.max_players = 1;
    })
    .await;
    let _first = login(server.addr, "First").await;

    let mut second = TcpStream::connect(server.addr).await.unwrap();
    let mut buf = [0u8; 16];
    let read = timeout(WAIT, second.read(&mut buf)).await.expect("not refused");
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn test_shutdown_notifies_players() {
    let server = start(|_| {}).await;
    let mut client = login(server.addr, "Witness").await;

    server.shutdown.send(()).await.unwrap();
    recv_chat_containing(&mut client, "Server closed").await;
    expect_closed(&mut client).await;

    let result = timeout(WAIT, server.handle).await.expect("server hung");
    assert!(result.unwrap().is_ok());
}
