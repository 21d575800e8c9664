//! End-to-end check against a real tokio-tungstenite server on localhost.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use ward_realtime::core::SubscriptionPayload;
use ward_realtime::{ClientConfig, ClientEvent, ConnectionState, Envelope, EnvelopeKind, connect};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn round_trip_over_real_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(stream).await.expect("handshake");
        let mut notified = false;
        while let Some(Ok(msg)) = ws.next().await {
            let closing = msg.is_close();
            let is_text = msg.is_text();
            let _ = seen_tx.send(msg);
            if closing {
                break;
            }
            // Answer the first subscription with a notification.
            if is_text && !notified {
                notified = true;
                let notification = Envelope::new(
                    EnvelopeKind::Notification,
                    sonic_rs::json!({"type": "info", "title": "Rounds", "message": "Ward round at 10:00"}),
                );
                ws.send(Message::text(notification.encode().expect("encode")))
                    .await
                    .expect("server send");
            }
        }
    });

    let config = ClientConfig::default().with_heartbeat_interval(Duration::from_secs(3_600));
    let handle = connect(&format!("ws://{addr}/ws"), Some("loopback"), config).await;
    let mut states = handle.state_changes();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == ConnectionState::Open),
    )
    .await
    .expect("open before timeout")
    .expect("state channel open");
    let mut events = handle.events();

    assert!(handle.subscribe_to_patient(42));
    let subscribe = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .expect("subscribe before timeout")
        .expect("server saw a frame");
    let text = subscribe.into_text().expect("text frame");
    let envelope = Envelope::decode(text.as_bytes()).expect("envelope");
    assert_eq!(envelope.kind, EnvelopeKind::Subscribe);
    let payload: SubscriptionPayload = envelope.payload().expect("payload");
    assert_eq!(payload.patient_id, Some(42));

    let message = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(ClientEvent::Message(envelope)) => break envelope,
                Ok(_) => continue,
                Err(err) => panic!("event stream failed: {err}"),
            }
        }
    })
    .await
    .expect("notification received");
    assert_eq!(message.kind, EnvelopeKind::Notification);
    assert_eq!(handle.recent_messages().len(), 1);

    handle.shutdown().await;
    let close = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .expect("close before timeout")
        .expect("server saw close");
    match close {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1000),
        other => panic!("expected close frame, got {other:?}"),
    }
}
