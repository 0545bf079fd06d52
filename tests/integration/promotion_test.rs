// tests/integration/promotion_test.rs

//! The PROMOTE state machine end-to-end: the happy path and each failure
//! mode, including that the endpoint only moves on full success.

use super::test_helpers::{
    MockUpstream, TestClient, info_reply, ping_frame, promote_frame, start_proxy,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A primary whose INFO reply is fixed, answering PING for routing checks.
async fn primary_with_info(info: Vec<u8>) -> MockUpstream {
    MockUpstream::start(move |command| match command {
        "INFO" => Some(info.clone()),
        "PING" => Some(b"+PONG\r\n".to_vec()),
        _ => None,
    })
    .await
}

#[tokio::test]
async fn test_promotion_happy_path() {
    let demotions = Arc::new(AtomicUsize::new(0));
    let demotions_seen = Arc::clone(&demotions);
    let replica = MockUpstream::start(move |command| match command {
        "SLAVEOF" => {
            demotions_seen.fetch_add(1, Ordering::SeqCst);
            Some(b"+OK\r\n".to_vec())
        }
        "PING" => Some(b"+PONG\r\n".to_vec()),
        _ => None,
    })
    .await;
    let replica_port = replica.addr.port();

    let primary =
        primary_with_info(info_reply(100, &[("127.0.0.1", replica_port, 100)])).await;
    let proxy = start_proxy(primary.addr, None).await;

    // C1 idles with an open session; C2 issues the promotion.
    let mut c1 = TestClient::connect(proxy).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    let mut c2 = TestClient::connect(proxy).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    c2.send(&promote_frame("127.0.0.1", replica_port, &["1000"]))
        .await;
    c2.expect(b"+OK\r\n").await;

    assert_eq!(demotions.load(Ordering::SeqCst), 1);

    // Every proxied session was severed: C1's next read is EOF, and C2's
    // own session winds down right after the acknowledgement.
    c1.expect_eof().await;
    c2.expect_eof().await;

    // New connections are served against the promoted replica.
    let served_before = replica.connection_count();
    let mut c3 = TestClient::connect(proxy).await;
    c3.send(ping_frame()).await;
    c3.expect(b"+PONG\r\n").await;
    assert!(replica.connection_count() > served_before);
}

#[tokio::test]
async fn test_promotion_fails_when_target_is_not_a_replica() {
    let replica = MockUpstream::start(|_| None).await;
    let replica_port = replica.addr.port();

    // The INFO reply lists an unrelated replica only.
    let primary = primary_with_info(info_reply(100, &[("10.9.9.9", 7000, 100)])).await;
    let proxy = start_proxy(primary.addr, None).await;

    let mut client = TestClient::connect(proxy).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    client
        .send(&promote_frame("127.0.0.1", replica_port, &["1000"]))
        .await;

    let line = client.expect_line().await;
    assert_eq!(line, format!("-ERR 127.0.0.1:{replica_port} is not a slave"));
    client.expect_eof().await;

    // The endpoint is unchanged: new sessions still reach the primary.
    let primary_before = primary.connection_count();
    let mut next = TestClient::connect(proxy).await;
    next.send(ping_frame()).await;
    next.expect(b"+PONG\r\n").await;
    assert!(primary.connection_count() > primary_before);
}

#[tokio::test]
async fn test_promotion_times_out_while_replica_lags() {
    let demotions = Arc::new(AtomicUsize::new(0));
    let demotions_seen = Arc::clone(&demotions);
    let replica = MockUpstream::start(move |command| match command {
        "SLAVEOF" => {
            demotions_seen.fetch_add(1, Ordering::SeqCst);
            Some(b"+OK\r\n".to_vec())
        }
        _ => None,
    })
    .await;
    let replica_port = replica.addr.port();

    // The replica's reported offset never reaches the primary's.
    let primary =
        primary_with_info(info_reply(200, &[("127.0.0.1", replica_port, 100)])).await;
    let proxy = start_proxy(primary.addr, None).await;

    let mut client = TestClient::connect(proxy).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = std::time::Instant::now();
    client
        .send(&promote_frame("127.0.0.1", replica_port, &["500"]))
        .await;
    client.expect(b"-ERR timed out\r\n").await;
    assert!(started.elapsed() >= Duration::from_millis(500));

    // The demote was never sent and the endpoint did not move.
    assert_eq!(demotions.load(Ordering::SeqCst), 0);
    let primary_before = primary.connection_count();
    let mut next = TestClient::connect(proxy).await;
    next.send(ping_frame()).await;
    next.expect(b"+PONG\r\n").await;
    assert!(primary.connection_count() > primary_before);
}

#[tokio::test]
async fn test_refused_demote_passes_the_error_through() {
    let replica = MockUpstream::start(|command| match command {
        "SLAVEOF" => Some(b"-ERR not a slave\r\n".to_vec()),
        _ => None,
    })
    .await;
    let replica_port = replica.addr.port();

    let primary =
        primary_with_info(info_reply(100, &[("127.0.0.1", replica_port, 100)])).await;
    let proxy = start_proxy(primary.addr, None).await;

    let mut client = TestClient::connect(proxy).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    client
        .send(&promote_frame("127.0.0.1", replica_port, &["1000"]))
        .await;

    // The replica's error string is relayed unchanged.
    client.expect(b"-ERR not a slave\r\n").await;
    client.expect_eof().await;

    let primary_before = primary.connection_count();
    let mut next = TestClient::connect(proxy).await;
    next.send(ping_frame()).await;
    next.expect(b"+PONG\r\n").await;
    assert!(primary.connection_count() > primary_before);
}

#[tokio::test]
async fn test_promotion_ahead_replica_counts_as_caught_up() {
    let replica = MockUpstream::start(|command| match command {
        "SLAVEOF" => Some(b"+OK\r\n".to_vec()),
        _ => None,
    })
    .await;
    let replica_port = replica.addr.port();

    // The replica reports an offset past the primary's measurement.
    let primary =
        primary_with_info(info_reply(100, &[("127.0.0.1", replica_port, 140)])).await;
    let proxy = start_proxy(primary.addr, None).await;

    let mut client = TestClient::connect(proxy).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    client
        .send(&promote_frame("127.0.0.1", replica_port, &["1000"]))
        .await;
    client.expect(b"+OK\r\n").await;
}

#[tokio::test]
async fn test_promotion_with_auth_reaches_authenticated_replica() {
    let replica = MockUpstream::start(|command| match command {
        "AUTH" => Some(b"+OK\r\n".to_vec()),
        "SLAVEOF" => Some(b"+OK\r\n".to_vec()),
        "PING" => Some(b"+PONG\r\n".to_vec()),
        _ => None,
    })
    .await;
    let replica_port = replica.addr.port();

    let primary =
        primary_with_info(info_reply(100, &[("127.0.0.1", replica_port, 100)])).await;
    let proxy = start_proxy(primary.addr, None).await;

    let mut client = TestClient::connect(proxy).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    client
        .send(&promote_frame("127.0.0.1", replica_port, &["s3cret", "1000"]))
        .await;
    client.expect(b"+OK\r\n").await;
    client.expect_eof().await;

    // Post-promotion sessions authenticate against the new upstream.
    let mut next = TestClient::connect(proxy).await;
    next.send(ping_frame()).await;
    next.expect(b"+PONG\r\n").await;
}

#[tokio::test]
async fn test_promote_with_bad_arity_reports_an_error() {
    let primary = primary_with_info(info_reply(0, &[])).await;
    let proxy = start_proxy(primary.addr, None).await;

    let mut client = TestClient::connect(proxy).await;
    client.send(b"*1\r\n$7\r\nPROMOTE\r\n").await;
    client
        .expect(b"-ERR wrong number of arguments for 'promote' command\r\n")
        .await;
    client.expect_eof().await;
}
