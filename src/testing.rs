//! Reusable test utilities for exercising the connection actor without a real socket.
//!
//! [`MockTransport`] hands every connect attempt to a scripted outcome and, for accepted
//! attempts, gives the test a [`MockConnection`] playing the server side of that socket.
//! Connect attempts are timestamped with `tokio::time::Instant`, so back-off schedules can be
//! asserted exactly under `#[tokio::test(start_paused = true)]`.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{Sink, Stream};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::core::{Envelope, EnvelopeKind, RealtimeError, RealtimeResult, WsFrame};
use crate::transport::{WsTransport, WsTransportConnectFuture};

/// What the mock endpoint does with one connect attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockOutcome {
    Accept,
    /// Handshake fails with this message.
    Fail(String),
    /// Accept after the given handshake latency.
    Delay(Duration),
}

struct MockInner {
    script: Mutex<VecDeque<MockOutcome>>,
    fallback: Mutex<MockOutcome>,
    attempts: Mutex<Vec<(Instant, String)>>,
    accepted_tx: mpsc::UnboundedSender<MockConnection>,
}

impl MockInner {
    fn next_outcome(&self) -> MockOutcome {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().clone())
    }
}

/// A transport backed by in-memory channels.
///
/// Create it with [`MockTransport::channel_pair`] to obtain the transport for the client and
/// the [`MockServer`] that scripts and observes connect attempts.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    /// Build a transport + server control pair. Attempts are accepted unless scripted otherwise.
    pub fn channel_pair() -> (Self, MockServer) {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(MockInner {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(MockOutcome::Accept),
            attempts: Mutex::new(Vec::new()),
            accepted_tx,
        });
        (
            Self {
                inner: Arc::clone(&inner),
            },
            MockServer { accepted_rx, inner },
        )
    }
}

impl WsTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(&self, address: String) -> WsTransportConnectFuture<Self::Reader, Self::Writer> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            inner.attempts.lock().push((Instant::now(), address));
            match inner.next_outcome() {
                MockOutcome::Fail(message) => return Err(RealtimeError::ConnectionFailed(message)),
                MockOutcome::Delay(latency) => tokio::time::sleep(latency).await,
                MockOutcome::Accept => {}
            }

            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            let closed = Arc::new(AtomicBool::new(false));
            let connection = MockConnection {
                outbound_rx,
                inbound_tx: Some(inbound_tx),
                closed: Arc::clone(&closed),
            };
            inner.accepted_tx.send(connection).map_err(|_| RealtimeError::Transport {
                context: "mock_transport_connect",
                error: "mock server dropped".to_string(),
            })?;
            Ok((
                MockReader { rx: inbound_rx },
                MockWriter {
                    sent_tx: outbound_tx,
                    closed,
                },
            ))
        })
    }
}

/// Test-side control of a [`MockTransport`].
pub struct MockServer {
    accepted_rx: mpsc::UnboundedReceiver<MockConnection>,
    inner: Arc<MockInner>,
}

impl MockServer {
    /// Queue outcomes for the next connect attempts, in order.
    pub fn script(&self, outcomes: impl IntoIterator<Item = MockOutcome>) {
        self.inner.script.lock().extend(outcomes);
    }

    /// Outcome used once the script is empty.
    pub fn set_fallback(&self, outcome: MockOutcome) {
        *self.inner.fallback.lock() = outcome;
    }

    /// Times at which connect attempts started.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.inner.attempts.lock().iter().map(|(at, _)| *at).collect()
    }

    /// Addresses requested by connect attempts.
    pub fn attempt_addresses(&self) -> Vec<String> {
        self.inner
            .attempts
            .lock()
            .iter()
            .map(|(_, address)| address.clone())
            .collect()
    }

    pub fn attempt_count(&self) -> usize {
        self.inner.attempts.lock().len()
    }

    /// Wait for the next accepted connection.
    pub async fn next_connection(&mut self) -> Option<MockConnection> {
        self.accepted_rx.recv().await
    }

    pub async fn next_connection_timeout(&mut self, timeout: Duration) -> Option<MockConnection> {
        tokio::time::timeout(timeout, self.accepted_rx.recv())
            .await
            .unwrap_or_default()
    }
}

/// Error surface for operations on [`MockConnection`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MockServerError {
    /// The inbound socket side was intentionally dropped.
    SocketDropped,
    /// The client side is no longer receiving inbound frames.
    ChannelClosed,
}

impl std::fmt::Display for MockServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockServerError::SocketDropped => f.write_str("mock socket already dropped"),
            MockServerError::ChannelClosed => f.write_str("mock client channel is closed"),
        }
    }
}

impl std::error::Error for MockServerError {}

/// Server side of one accepted mock socket.
pub struct MockConnection {
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
    inbound_tx: Option<mpsc::UnboundedSender<RealtimeResult<WsFrame>>>,
    closed: Arc<AtomicBool>,
}

impl MockConnection {
    /// Receive a frame written by the client.
    pub async fn recv_outbound(&mut self) -> Option<WsFrame> {
        self.outbound_rx.recv().await
    }

    pub async fn recv_outbound_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .unwrap_or_default()
    }

    /// Receive the next outbound envelope of `kind`, skipping anything else.
    pub async fn recv_kind(&mut self, kind: EnvelopeKind) -> Option<Envelope> {
        while let Some(frame) = self.outbound_rx.recv().await {
            let Some(envelope) = frame.payload().and_then(|p| Envelope::decode(p).ok()) else {
                continue;
            };
            if envelope.kind == kind {
                return Some(envelope);
            }
        }
        None
    }

    /// Receive the next outbound envelope that is not a heartbeat.
    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        while let Some(frame) = self.outbound_rx.recv().await {
            let Some(envelope) = frame.payload().and_then(|p| Envelope::decode(p).ok()) else {
                continue;
            };
            if !envelope.is_liveness() {
                return Some(envelope);
            }
        }
        None
    }

    /// Push an inbound frame to the client.
    pub fn send_inbound(&self, frame: WsFrame) -> Result<(), MockServerError> {
        self.push(Ok(frame))
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), MockServerError> {
        self.send_inbound(WsFrame::text(text))
    }

    pub fn send_envelope(&self, envelope: &Envelope) -> Result<(), MockServerError> {
        let text = envelope
            .encode()
            .map_err(|_| MockServerError::ChannelClosed)?;
        self.send_text(text)
    }

    /// Send a close frame, then drop the inbound side.
    pub fn close(&mut self, code: u16, reason: &str) -> Result<(), MockServerError> {
        let result = self.send_inbound(WsFrame::close(code, reason));
        self.inbound_tx = None;
        result
    }

    /// Surface a read error on the client's reader.
    pub fn inject_error(&self, message: &str) -> Result<(), MockServerError> {
        self.push(Err(RealtimeError::Transport {
            context: "mock_read",
            error: message.to_string(),
        }))
    }

    /// Simulate a socket drop without a close frame.
    pub fn drop_socket(&mut self) {
        self.inbound_tx = None;
    }

    /// Whether the client closed its write half.
    pub fn closed_by_client(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn push(&self, item: RealtimeResult<WsFrame>) -> Result<(), MockServerError> {
        let Some(tx) = self.inbound_tx.as_ref() else {
            return Err(MockServerError::SocketDropped);
        };
        tx.send(item).map_err(|_| MockServerError::ChannelClosed)
    }
}

/// Reader side for [`MockTransport`].
pub struct MockReader {
    rx: mpsc::UnboundedReceiver<RealtimeResult<WsFrame>>,
}

impl Stream for MockReader {
    type Item = RealtimeResult<WsFrame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Writer side for [`MockTransport`].
pub struct MockWriter {
    sent_tx: mpsc::UnboundedSender<WsFrame>,
    closed: Arc<AtomicBool>,
}

impl Sink<WsFrame> for MockWriter {
    type Error = RealtimeError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        self.get_mut()
            .sent_tx
            .send(item)
            .map_err(|_| RealtimeError::Transport {
                context: "mock_transport_write",
                error: "mock outbound channel closed".to_string(),
            })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.closed.store(true, Ordering::Release);
        Poll::Ready(Ok(()))
    }
}
