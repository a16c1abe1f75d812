use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use wslite::{
    CloseReason, ConnectionState, FrameError, Handler, HandshakeError, HandshakeMode, Options,
    Role, Session,
};

fn init_logging() {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .init();
}

fn commands(text: &str) -> Option<String> {
    match text {
        "ping" => Some("pong".to_owned()),
        "close" => Some("bye".to_owned()),
        "silent" => None,
        other => match other.strip_prefix("echo ") {
            Some(rest) => Some(rest.to_owned()),
            None => Some(format!("Unknown command: {other}")),
        },
    }
}

/// Same commands, but `close` ends the session after the reply.
struct ClosingCommands;

impl Handler for ClosingCommands {
    fn handle(&mut self, text: &str) -> Option<String> {
        commands(text)
    }

    fn closes_after(&self, text: &str) -> bool {
        text == "close"
    }
}

fn spawn_server(
    stream: DuplexStream,
    options: Options,
) -> tokio::task::JoinHandle<Result<CloseReason, HandshakeError>> {
    tokio::spawn(async move {
        let mut session = Session::new(stream, options);
        session.accept().await?;
        Ok(session.run(commands).await)
    })
}

async fn connect(stream: DuplexStream, options: Options) -> Session<DuplexStream> {
    let mut session = Session::new(stream, options);
    session.connect("localhost", 9090).await.unwrap();
    session
}

#[tokio::test]
async fn command_exchange_and_local_close() {
    init_logging();
    let (client_io, server_io) = duplex(64 * 1024);
    let server = spawn_server(server_io, Options::default());

    let mut client = connect(client_io, Options::default()).await;
    assert_eq!(client.role(), Some(Role::Client));
    assert_eq!(client.state(), ConnectionState::Open);

    client.send_text("ping").await.unwrap();
    assert_eq!(client.recv().await.as_deref(), Some("pong"));

    client.send_text("echo hello there").await.unwrap();
    assert_eq!(client.recv().await.as_deref(), Some("hello there"));

    client.send_text("silent").await.unwrap();
    client.send_text("dance").await.unwrap();
    assert_eq!(
        client.recv().await.as_deref(),
        Some("Unknown command: dance")
    );

    client.send_text("close").await.unwrap();
    assert_eq!(client.recv().await.as_deref(), Some("bye"));

    client.close().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(matches!(client.close_reason(), Some(CloseReason::LocalClose)));

    let reason = server.await.unwrap().unwrap();
    assert!(matches!(reason, CloseReason::PeerClose));
}

#[tokio::test]
async fn large_messages_use_extended_lengths() {
    let (client_io, server_io) = duplex(16 * 1024);
    let server = spawn_server(server_io, Options::default());
    let mut client = connect(client_io, Options::default()).await;

    for size in [126, 65535, 65536, 200_000] {
        let text = "x".repeat(size);
        client.send_text(&format!("echo {text}")).await.unwrap();
        let reply = client.recv().await.unwrap();
        assert_eq!(reply.len(), size);
        assert_eq!(reply, text);
    }

    client.close().await.unwrap();
    assert!(matches!(
        server.await.unwrap().unwrap(),
        CloseReason::PeerClose
    ));
}

#[tokio::test]
async fn server_side_close_reaches_client() {
    let (client_io, server_io) = duplex(4096);
    let server = tokio::spawn(async move {
        let mut session = Session::new(server_io, Options::default());
        session.accept().await.unwrap();
        session.send_text("welcome").await.unwrap();
        session.close().await.unwrap();
        session
    });

    let mut client = connect(client_io, Options::default()).await;
    assert_eq!(client.recv().await.as_deref(), Some("welcome"));
    assert_eq!(client.recv().await, None);
    assert!(matches!(client.close_reason(), Some(CloseReason::PeerClose)));
    assert!(matches!(
        client.send_text("late").await,
        Err(FrameError::ConnectionClosed)
    ));

    let server = server.await.unwrap();
    assert!(matches!(server.close_reason(), Some(CloseReason::LocalClose)));
}

#[tokio::test]
async fn oversized_frame_is_rejected() {
    let (client_io, server_io) = duplex(4096);
    let server = spawn_server(server_io, Options::default().with_max_payload_read(16));
    let mut client = connect(client_io, Options::default()).await;

    client.send_text(&"y".repeat(100)).await.unwrap();
    assert_eq!(client.recv().await, None);
    assert!(matches!(client.close_reason(), Some(CloseReason::PeerClose)));

    let reason = server.await.unwrap().unwrap();
    assert!(matches!(
        reason,
        CloseReason::Failed(FrameError::LengthOverflow {
            length: 100,
            max: 16
        })
    ));
}

#[tokio::test]
async fn frame_pipelined_behind_handshake() {
    let (mut peer, server_io) = duplex(4096);
    let server = spawn_server(server_io, Options::default());

    let key = [1, 2, 3, 4];
    let mut wire = b"GET / HTTP/1.1\r\n\
                     Host: localhost\r\n\
                     Upgrade: websocket\r\n\
                     Connection: Upgrade\r\n\
                     Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                     Sec-WebSocket-Version: 13\r\n\r\n"
        .to_vec();
    wire.extend_from_slice(&[0x81, 0x84]);
    wire.extend_from_slice(&key);
    wire.extend(b"ping".iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
    wire.extend_from_slice(&[0x88, 0x80, 0, 0, 0, 0]);
    peer.write_all(&wire).await.unwrap();

    assert!(matches!(
        server.await.unwrap().unwrap(),
        CloseReason::PeerClose
    ));

    let mut response = Vec::new();
    peer.read_to_end(&mut response).await.unwrap();
    let head = b"HTTP/1.1 101 Switching Protocols\r\n\
                 Upgrade: websocket\r\n\
                 Connection: Upgrade\r\n\
                 Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";
    assert!(response.starts_with(head));
    assert_eq!(&response[head.len()..], b"\x81\x04pong\x88\x00");
}

#[tokio::test]
async fn close_command_ends_session() -> anyhow::Result<()> {
    let (client_io, server_io) = duplex(4096);
    let server = tokio::spawn(async move {
        let mut session = Session::new(server_io, Options::default());
        session.accept().await?;
        Ok::<_, HandshakeError>(session.run(ClosingCommands).await)
    });

    let mut client = connect(client_io, Options::default()).await;
    client.send_text("ping").await?;
    assert_eq!(client.recv().await.as_deref(), Some("pong"));

    client.send_text("close").await?;
    assert_eq!(client.recv().await.as_deref(), Some("bye"));
    assert_eq!(client.recv().await, None);
    assert!(matches!(client.close_reason(), Some(CloseReason::PeerClose)));
    assert!(matches!(
        client.send_text("ping").await,
        Err(FrameError::ConnectionClosed)
    ));

    let reason = server.await??;
    assert!(matches!(reason, CloseReason::LocalClose));
    Ok(())
}

#[tokio::test]
async fn close_command_wire_bytes() -> anyhow::Result<()> {
    let (mut peer, server_io) = duplex(4096);
    let server = tokio::spawn(async move {
        let mut session = Session::new(server_io, Options::default());
        session.accept().await?;
        Ok::<_, HandshakeError>(session.run(ClosingCommands).await)
    });

    let key = [9, 8, 7, 6];
    let mut wire = b"GET / HTTP/1.1\r\n\
                     Upgrade: websocket\r\n\
                     Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
        .to_vec();
    wire.extend_from_slice(&[0x81, 0x85]);
    wire.extend_from_slice(&key);
    wire.extend(b"close".iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
    peer.write_all(&wire).await?;

    assert!(matches!(server.await??, CloseReason::LocalClose));

    let mut response = Vec::new();
    peer.read_to_end(&mut response).await?;
    assert!(response.ends_with(b"\r\n\r\n\x81\x03bye\x88\x00"));
    Ok(())
}

#[tokio::test]
async fn fixed_key_mode() -> anyhow::Result<()> {
    let options = Options::default().with_handshake_mode(HandshakeMode::demo());
    let (client_io, server_io) = duplex(4096);
    let server = spawn_server(server_io, options.clone());

    let mut client = connect(client_io, options).await;
    assert_eq!(client.accept_key(), Some("hello, kitty"));

    client.send_text("ping").await?;
    assert_eq!(client.recv().await.as_deref(), Some("pong"));
    client.close().await?;
    server.await??;
    Ok(())
}

#[tokio::test]
async fn fixed_key_server_rejects_derived_client() {
    let (client_io, server_io) = duplex(4096);
    let server = spawn_server(
        server_io,
        Options::default().with_handshake_mode(HandshakeMode::demo()),
    );

    let mut client = Session::new(client_io, Options::default());
    let err = client.connect("localhost", 9090).await.unwrap_err();
    assert!(matches!(err, HandshakeError::Incomplete));
    assert_eq!(client.state(), ConnectionState::Closed);

    assert!(matches!(
        server.await.unwrap(),
        Err(HandshakeError::UnexpectedKey(_))
    ));
}

#[tokio::test]
async fn plain_http_request_gets_fallback() {
    let (mut peer, server_io) = duplex(4096);
    let server = spawn_server(server_io, Options::default());

    peer.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    assert!(matches!(
        server.await.unwrap(),
        Err(HandshakeError::NotWebSocket)
    ));

    let mut response = String::new();
    peer.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("<h1>Not a WebSocket request</h1>"));
}
