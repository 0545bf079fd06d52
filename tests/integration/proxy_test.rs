// tests/integration/proxy_test.rs

//! Transparent-forwarding behavior: verbatim pass-through, framing errors,
//! and upstream dial failures.

use super::test_helpers::{MockUpstream, TestClient, ping_frame, start_proxy};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[tokio::test]
async fn test_forwards_command_bytes_verbatim_and_streams_reply() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = listener.local_addr().unwrap();

    let frame: &[u8] = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n";
    let upstream = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; frame.len()];
        socket.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..], frame, "upstream must see the exact client bytes");
        socket.write_all(b"$3\r\nbar\r\n").await.unwrap();
        // Stay open until the session tears down.
        let mut rest = [0u8; 64];
        let _ = socket.read(&mut rest).await;
    });

    let proxy = start_proxy(upstream_addr, None).await;
    let mut client = TestClient::connect(proxy).await;
    client.send(frame).await;
    client.expect(b"$3\r\nbar\r\n").await;

    drop(client);
    upstream.await.unwrap();
}

#[tokio::test]
async fn test_bad_framing_gets_syntax_error_and_session_survives() {
    let upstream = MockUpstream::start(|command| match command {
        "PING" => Some(b"+PONG\r\n".to_vec()),
        _ => None,
    })
    .await;
    let proxy = start_proxy(upstream.addr, None).await;

    let mut client = TestClient::connect(proxy).await;
    client.send(b"+NOTOK\n").await;
    client.expect(b"-ERR resp: invalid syntax\r\n").await;

    // The session is still alive and still forwards.
    client.send(ping_frame()).await;
    client.expect(b"+PONG\r\n").await;
}

#[tokio::test]
async fn test_pipelined_commands_keep_their_order() {
    let upstream = MockUpstream::start(|command| match command {
        "PING" => Some(b"+PONG\r\n".to_vec()),
        "ECHO" => Some(b"$2\r\nhi\r\n".to_vec()),
        _ => None,
    })
    .await;
    let proxy = start_proxy(upstream.addr, None).await;

    let mut client = TestClient::connect(proxy).await;
    let mut pipelined = Vec::new();
    pipelined.extend_from_slice(ping_frame());
    pipelined.extend_from_slice(b"*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n");
    pipelined.extend_from_slice(ping_frame());
    client.send(&pipelined).await;

    client.expect(b"+PONG\r\n$2\r\nhi\r\n+PONG\r\n").await;
}

#[tokio::test]
async fn test_unreachable_upstream_fails_the_session_with_an_error() {
    // Bind-then-drop to get a port with nothing listening on it.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = listener.local_addr().unwrap();
    drop(listener);

    let proxy = start_proxy(dead_addr, None).await;
    let mut client = TestClient::connect(proxy).await;

    let line = client.expect_line().await;
    assert!(
        line.starts_with("-ERR "),
        "expected an error reply, got {line:?}"
    );
    client.expect_eof().await;
}

#[tokio::test]
async fn test_upstream_auth_handshake_on_open() {
    let upstream = MockUpstream::start(|command| match command {
        "AUTH" => Some(b"+OK\r\n".to_vec()),
        "PING" => Some(b"+PONG\r\n".to_vec()),
        _ => None,
    })
    .await;
    let proxy = start_proxy(upstream.addr, Some("sekrit")).await;

    let mut client = TestClient::connect(proxy).await;
    client.send(ping_frame()).await;
    client.expect(b"+PONG\r\n").await;
}

#[tokio::test]
async fn test_rejected_upstream_auth_fails_the_session() {
    let upstream = MockUpstream::start(|command| match command {
        "AUTH" => Some(b"-ERR invalid password\r\n".to_vec()),
        _ => None,
    })
    .await;
    let proxy = start_proxy(upstream.addr, Some("wrong")).await;

    let mut client = TestClient::connect(proxy).await;
    client.expect(b"-ERR invalid password\r\n").await;
    client.expect_eof().await;
}
