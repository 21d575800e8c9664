#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use ward_realtime::core::{WsCloseFrame, WsFrame};
use ward_realtime::testing::{MockConnection, MockServer, MockTransport};
use ward_realtime::transport::WsTransport;
use ward_realtime::{ClientConfig, ClientEvent, ConnectionHandle, ConnectionState, Envelope};

pub const BASE_URL: &str = "ws://ward.test/ws";
pub const WAIT: Duration = Duration::from_secs(120);

pub type MockHandle = ConnectionHandle<MockTransport>;

pub fn mock_client(client_id: Option<&str>, config: ClientConfig) -> (MockHandle, MockServer) {
    let (transport, server) = MockTransport::channel_pair();
    let handle = ConnectionHandle::with_transport(transport, BASE_URL, client_id, config);
    (handle, server)
}

/// Connects and returns the server side of the accepted socket.
pub async fn open_client(
    client_id: Option<&str>,
    config: ClientConfig,
) -> (MockHandle, MockServer, MockConnection) {
    let (handle, mut server) = mock_client(client_id, config);
    handle.connect().await;
    let connection = server
        .next_connection_timeout(WAIT)
        .await
        .expect("mock connection accepted");
    wait_for_state(&handle, ConnectionState::Open).await;
    (handle, server, connection)
}

pub async fn wait_for_state<T: WsTransport>(handle: &ConnectionHandle<T>, state: ConnectionState) {
    let mut rx = handle.state_changes();
    let reached = matches!(
        tokio::time::timeout(WAIT, rx.wait_for(|s| *s == state)).await,
        Ok(Ok(_))
    );
    if !reached {
        panic!(
            "timed out waiting for {state} (last={})",
            handle.state()
        );
    }
}

pub async fn next_event(rx: &mut broadcast::Receiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("event before timeout")
        .expect("event channel open")
}

pub async fn next_message(rx: &mut broadcast::Receiver<ClientEvent>) -> Envelope {
    loop {
        if let ClientEvent::Message(envelope) = next_event(rx).await {
            return envelope;
        }
    }
}

/// Reads outbound frames until the client's close frame.
pub async fn recv_close(connection: &mut MockConnection) -> Option<WsCloseFrame> {
    loop {
        match connection.recv_outbound_timeout(WAIT).await {
            Some(WsFrame::Close(frame)) => return frame,
            Some(_) => continue,
            None => panic!("connection ended without a close frame"),
        }
    }
}

/// Thread-safe recorder for callback arguments.
#[derive(Clone)]
pub struct Recorder<T>(Arc<Mutex<Vec<T>>>);

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn push(&self, item: T) {
        self.0.lock().push(item);
    }

    pub fn items(&self) -> Vec<T> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }
}
