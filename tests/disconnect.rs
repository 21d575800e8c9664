mod common;

use std::time::Duration;

use common::{Recorder, mock_client, open_client, recv_close, wait_for_state};
use ward_realtime::core::NORMAL_CLOSURE;
use ward_realtime::testing::MockOutcome;
use ward_realtime::{ClientConfig, CloseReason, ConnectionState};

#[tokio::test(start_paused = true)]
async fn disconnect_sends_normal_close_and_stops_retrying() {
    let (handle, server, mut connection) = open_client(None, ClientConfig::default()).await;
    let closes = Recorder::<CloseReason>::new();
    {
        let c = closes.clone();
        handle.on_close(move |reason| c.push(reason.clone()));
    }

    handle.disconnect().await;

    let frame = recv_close(&mut connection).await.expect("close frame");
    assert_eq!(frame.code, NORMAL_CLOSURE);
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert_eq!(handle.reconnect_attempts(), 0);
    assert!(!handle.is_connected());
    assert_eq!(closes.items(), vec![CloseReason::normal("client disconnect")]);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(server.attempt_count(), 1, "no reconnect after disconnect");
    assert!(connection.closed_by_client());
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_retry() {
    let config = ClientConfig::default()
        .with_reconnect_interval(Duration::from_millis(1_000))
        .with_max_reconnect_attempts(10);
    let (handle, server) = mock_client(None, config);
    server.set_fallback(MockOutcome::Fail("down".to_string()));

    handle.connect().await;
    wait_for_state(&handle, ConnectionState::Closed).await;
    assert_eq!(handle.reconnect_attempts(), 1);

    handle.disconnect().await;
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert_eq!(handle.reconnect_attempts(), 0);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(server.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent() {
    let (handle, _server, _connection) = open_client(None, ClientConfig::default()).await;
    let closes = Recorder::<CloseReason>::new();
    {
        let c = closes.clone();
        handle.on_close(move |reason| c.push(reason.clone()));
    }

    handle.disconnect().await;
    handle.disconnect().await;
    handle.disconnect().await;

    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert_eq!(closes.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_before_connect_is_harmless() {
    let (handle, server) = mock_client(None, ClientConfig::default());
    handle.disconnect().await;
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert_eq!(server.attempt_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_handshake_discards_late_connection() {
    let (handle, server) = mock_client(None, ClientConfig::default());
    server.set_fallback(MockOutcome::Delay(Duration::from_secs(1)));
    let opens = Recorder::<()>::new();
    {
        let o = opens.clone();
        handle.on_open(move || o.push(()));
    }

    handle.connect().await;
    wait_for_state(&handle, ConnectionState::Connecting).await;
    handle.disconnect().await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert_eq!(opens.len(), 0);
    assert!(!handle.send(ward_realtime::Envelope::new(
        ward_realtime::EnvelopeKind::Notification,
        sonic_rs::Value::default(),
    )));
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_connection() {
    let (handle, server, mut connection) = open_client(None, ClientConfig::default()).await;
    let other = handle.clone();

    handle.shutdown().await;

    let frame = recv_close(&mut connection).await.expect("close frame");
    assert_eq!(frame.code, NORMAL_CLOSURE);
    assert_eq!(other.state(), ConnectionState::Disconnected);
    assert!(other.stats().await.is_err(), "actor is gone");

    other.connect().await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(server.attempt_count(), 1);
}
