//! Connection actor.
//!
//! The socket IO runs in plain tokio tasks (reader, writer, heartbeat ticker, reconnect timer);
//! the actor owns the lifecycle state machine and receives everything as messages, so every
//! transition runs serially in its mailbox. Each transport instance is tagged with an epoch and
//! messages carrying an older epoch are ignored.

use std::sync::Arc;

use futures_util::StreamExt;
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage, WeakActorRef};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::handle::SharedState;
use super::writer::spawn_writer;
use crate::core::{
    ClientHeartbeat, ClientStats, CloseReason, ConnectionHealth, ConnectionState, Envelope,
    LinearBackoffReconnect, LivenessResult, LivenessStrategy, NORMAL_CLOSURE, RealtimeError,
    RealtimeResult, ReconnectAttempt, ReconnectStrategy, WsFrame,
};
use crate::transport::tungstenite::TungsteniteTransport;
use crate::transport::{WsTransport, parse_address};

/// Close code used when the heartbeat reply timed out.
pub const HEARTBEAT_TIMEOUT_CLOSURE: u16 = 4000;

/// Arguments passed when constructing a connection actor.
pub struct RealtimeActorArgs<T, R = LinearBackoffReconnect, L = ClientHeartbeat>
where
    T: WsTransport,
    R: ReconnectStrategy,
    L: LivenessStrategy,
{
    pub address: String,
    pub transport: T,
    pub reconnect: R,
    pub liveness: L,
    pub(crate) shared: Arc<SharedState>,
}

pub struct RealtimeActor<T = TungsteniteTransport, R = LinearBackoffReconnect, L = ClientHeartbeat>
where
    T: WsTransport,
    R: ReconnectStrategy,
    L: LivenessStrategy,
{
    address: String,
    transport: T,
    reconnect: R,
    liveness: L,
    health: ConnectionHealth,
    shared: Arc<SharedState>,
    actor_ref: ActorRef<Self>,
    status: ConnectionState,
    epoch: u64,
    connect_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl<T, R, L> Actor for RealtimeActor<T, R, L>
where
    T: WsTransport,
    R: ReconnectStrategy,
    L: LivenessStrategy,
{
    type Args = RealtimeActorArgs<T, R, L>;
    type Error = RealtimeError;

    fn name() -> &'static str {
        "RealtimeActor"
    }

    async fn on_start(args: Self::Args, ctx: ActorRef<Self>) -> RealtimeResult<Self> {
        let RealtimeActorArgs {
            address,
            transport,
            reconnect,
            liveness,
            shared,
        } = args;

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            address,
            transport,
            reconnect,
            liveness,
            health: ConnectionHealth::new(),
            shared,
            actor_ref: ctx,
            status: ConnectionState::Idle,
            epoch: 0,
            connect_task: None,
            reader_task: None,
            heartbeat_task: None,
            reconnect_task: None,
            shutdown_tx,
        })
    }

    async fn on_stop(
        &mut self,
        _ctx: WeakActorRef<Self>,
        _reason: kameo::error::ActorStopReason,
    ) -> RealtimeResult<()> {
        self.cancel_timers();
        self.teardown_transport();
        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }
}

/// Events processed by the connection actor.
#[derive(Debug)]
pub enum RealtimeEvent {
    /// Consumer-requested connect.
    Connect,
    Inbound {
        epoch: u64,
        frame: WsFrame,
    },
    TransportClosed {
        epoch: u64,
        reason: CloseReason,
    },
    TransportError {
        epoch: u64,
        error: RealtimeError,
    },
    SendHeartbeat {
        epoch: u64,
    },
    ReconnectDue {
        epoch: u64,
    },
}

pub(crate) struct ConnectionEstablished<T: WsTransport> {
    pub(crate) epoch: u64,
    pub(crate) reader: T::Reader,
    pub(crate) writer: T::Writer,
}

pub(crate) struct ConnectionFailed {
    pub(crate) epoch: u64,
    pub(crate) error: RealtimeError,
}

/// Consumer-requested disconnect. Replies once timers are cancelled and the close is queued.
#[derive(Debug, Clone, Copy)]
pub struct Disconnect;

#[derive(Debug, Clone, Copy)]
pub struct GetStats;

impl<T, R, L> KameoMessage<RealtimeEvent> for RealtimeActor<T, R, L>
where
    T: WsTransport,
    R: ReconnectStrategy,
    L: LivenessStrategy,
{
    type Reply = ();

    async fn handle(&mut self, event: RealtimeEvent, _ctx: &mut Context<Self, Self::Reply>) {
        match event {
            RealtimeEvent::Connect => self.handle_connect(),
            RealtimeEvent::Inbound { epoch, frame } => {
                if self.is_current(epoch) {
                    self.process_inbound(frame);
                }
            }
            RealtimeEvent::TransportClosed { epoch, reason } => {
                if self.is_current(epoch) {
                    self.handle_transport_lost(reason);
                }
            }
            RealtimeEvent::TransportError { epoch, error } => {
                if self.is_current(epoch) {
                    warn!(connection = %self.shared.connection, error = %error, "websocket transport error");
                    let reason = CloseReason::abnormal(error.to_string());
                    self.shared.dispatch_error(error);
                    self.handle_transport_lost(reason);
                }
            }
            RealtimeEvent::SendHeartbeat { epoch } => {
                if self.is_current(epoch) {
                    self.emit_heartbeat();
                }
            }
            RealtimeEvent::ReconnectDue { epoch } => {
                if epoch == self.epoch && self.status == ConnectionState::Closed {
                    self.reconnect_task = None;
                    self.start_connect();
                }
            }
        }
    }
}

impl<T, R, L> KameoMessage<ConnectionEstablished<T>> for RealtimeActor<T, R, L>
where
    T: WsTransport,
    R: ReconnectStrategy,
    L: LivenessStrategy,
{
    type Reply = ();

    async fn handle(
        &mut self,
        msg: ConnectionEstablished<T>,
        _ctx: &mut Context<Self, Self::Reply>,
    ) {
        if msg.epoch != self.epoch || self.status != ConnectionState::Connecting {
            // Dropping both halves closes the superseded socket.
            debug!(connection = %self.shared.connection, epoch = msg.epoch, "discarding superseded connection");
            return;
        }
        self.on_connection_established(msg.reader, msg.writer);
    }
}

impl<T, R, L> KameoMessage<ConnectionFailed> for RealtimeActor<T, R, L>
where
    T: WsTransport,
    R: ReconnectStrategy,
    L: LivenessStrategy,
{
    type Reply = ();

    async fn handle(&mut self, msg: ConnectionFailed, _ctx: &mut Context<Self, Self::Reply>) {
        if msg.epoch != self.epoch || self.status != ConnectionState::Connecting {
            return;
        }
        self.connect_task = None;
        warn!(
            connection = %self.shared.connection,
            address = %self.address,
            error = %msg.error,
            "websocket handshake failed"
        );
        let reason = CloseReason::abnormal(msg.error.to_string());
        self.shared.dispatch_error(msg.error);
        self.enter_closed(reason);
    }
}

impl<T, R, L> KameoMessage<Disconnect> for RealtimeActor<T, R, L>
where
    T: WsTransport,
    R: ReconnectStrategy,
    L: LivenessStrategy,
{
    type Reply = RealtimeResult<()>;

    async fn handle(&mut self, _msg: Disconnect, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.handle_disconnect();
        Ok(())
    }
}

impl<T, R, L> KameoMessage<GetStats> for RealtimeActor<T, R, L>
where
    T: WsTransport,
    R: ReconnectStrategy,
    L: LivenessStrategy,
{
    type Reply = RealtimeResult<ClientStats>;

    async fn handle(&mut self, _msg: GetStats, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let mut stats = self.health.get_stats(self.status, self.reconnect.attempts());
        stats.messages_sent = self.shared.messages_sent();
        stats.history_len = self.shared.history_len();
        Ok(stats)
    }
}

impl<T, R, L> RealtimeActor<T, R, L>
where
    T: WsTransport,
    R: ReconnectStrategy,
    L: LivenessStrategy,
{
    fn is_current(&self, epoch: u64) -> bool {
        epoch == self.epoch && self.status == ConnectionState::Open
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.status != state {
            debug!(
                connection = %self.shared.connection,
                from = %self.status,
                to = %state,
                "connection state change"
            );
        }
        self.status = state;
        self.shared.publish_state(state);
    }

    fn handle_connect(&mut self) {
        if self.status.is_active() {
            debug!(connection = %self.shared.connection, state = %self.status, "connect ignored");
            return;
        }
        if self.status == ConnectionState::Closed {
            // Connect now instead of waiting for the scheduled retry; the budget keeps counting.
            self.cancel_timers();
        } else {
            self.reconnect.reset();
            self.shared.set_attempts(0);
        }
        self.start_connect();
    }

    fn start_connect(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        let epoch = self.epoch;
        self.set_state(ConnectionState::Connecting);

        if let Err(err) = parse_address(&self.address) {
            error!(connection = %self.shared.connection, error = %err, "cannot open websocket");
            self.shared.dispatch_error(err);
            self.set_state(ConnectionState::Closed);
            self.schedule_reconnect("invalid address");
            return;
        }

        info!(
            connection = %self.shared.connection,
            address = %self.address,
            attempt = self.reconnect.attempts(),
            "opening websocket"
        );

        let actor_ref = self.actor_ref.clone();
        let address = self.address.clone();
        let transport = self.transport.clone();
        self.connect_task = Some(tokio::spawn(async move {
            match transport.connect(address).await {
                Ok((reader, writer)) => {
                    let _ = actor_ref
                        .tell(ConnectionEstablished::<T> {
                            epoch,
                            reader,
                            writer,
                        })
                        .send()
                        .await;
                }
                Err(error) => {
                    let _ = actor_ref.tell(ConnectionFailed { epoch, error }).send().await;
                }
            }
        }));
    }

    fn on_connection_established(&mut self, reader: T::Reader, writer: T::Writer) {
        self.connect_task = None;
        self.health.reset();
        self.reconnect.reset();
        self.liveness.reset();
        self.shared.set_attempts(0);

        let epoch = self.epoch;
        let (shutdown_tx, _) = watch::channel(false);
        self.shutdown_tx = shutdown_tx;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        spawn_writer(
            writer,
            outbound_rx,
            self.actor_ref.clone(),
            epoch,
            self.shared.connection.clone(),
        );
        self.shared.install_outbound(outbound_tx);

        self.spawn_reader(reader, epoch);
        self.start_heartbeat(epoch);

        self.set_state(ConnectionState::Open);
        info!(connection = %self.shared.connection, address = %self.address, "websocket connection established");
        self.shared.dispatch_open();
    }

    fn spawn_reader(&mut self, mut reader: T::Reader, epoch: u64) {
        let actor_ref = self.actor_ref.clone();
        let connection = self.shared.connection.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        self.reader_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = shutdown_rx.changed() => {
                        if res.is_err() || *shutdown_rx.borrow_and_update() { break; }
                    }
                    frame = reader.next() => {
                        match frame {
                            Some(Ok(WsFrame::Close(frame))) => {
                                info!(connection = %connection, close = ?frame, "received websocket close frame");
                                let reason = CloseReason::from_frame(frame.as_ref());
                                let _ = actor_ref
                                    .tell(RealtimeEvent::TransportClosed { epoch, reason })
                                    .send()
                                    .await;
                                break;
                            }
                            // Protocol pings are answered by the transport.
                            Some(Ok(WsFrame::Ping(_) | WsFrame::Pong(_))) => {}
                            Some(Ok(frame)) => {
                                if actor_ref
                                    .tell(RealtimeEvent::Inbound { epoch, frame })
                                    .send()
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Some(Err(error)) => {
                                let _ = actor_ref
                                    .tell(RealtimeEvent::TransportError { epoch, error })
                                    .send()
                                    .await;
                                break;
                            }
                            None => {
                                let _ = actor_ref
                                    .tell(RealtimeEvent::TransportClosed {
                                        epoch,
                                        reason: CloseReason::abnormal("stream ended"),
                                    })
                                    .send()
                                    .await;
                                break;
                            }
                        }
                    }
                }
            }
        }));
    }

    fn start_heartbeat(&mut self, epoch: u64) {
        if let Some(handle) = self.heartbeat_task.take() {
            handle.abort();
        }

        let interval = self.liveness.interval();
        if interval.is_zero() {
            info!(connection = %self.shared.connection, "heartbeat disabled");
            return;
        }

        let actor_ref = self.actor_ref.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        self.heartbeat_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    res = shutdown_rx.changed() => {
                        if res.is_err() || *shutdown_rx.borrow_and_update() { break; }
                    }
                    _ = ticker.tick() => {
                        if actor_ref
                            .tell(RealtimeEvent::SendHeartbeat { epoch })
                            .send()
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
        }));
    }

    fn emit_heartbeat(&mut self) {
        if self.liveness.is_stale() {
            warn!(connection = %self.shared.connection, "heartbeat reply timed out");
            self.shared
                .push_frame(WsFrame::close(HEARTBEAT_TIMEOUT_CLOSURE, "heartbeat timeout"));
            self.handle_transport_lost(CloseReason::new(
                HEARTBEAT_TIMEOUT_CLOSURE,
                "heartbeat timeout",
            ));
            return;
        }

        let Some(ping) = self.liveness.create_ping() else {
            return;
        };
        match ping.encode() {
            Ok(text) => {
                if self.shared.push_frame(WsFrame::text(text)) {
                    self.health.record_heartbeat();
                    if self.shared.debug {
                        debug!(connection = %self.shared.connection, "heartbeat sent");
                    }
                }
            }
            Err(err) => {
                warn!(connection = %self.shared.connection, error = %err, "heartbeat not serializable");
            }
        }
    }

    fn process_inbound(&mut self, frame: WsFrame) {
        let Some(payload) = frame.payload() else {
            return;
        };

        let envelope = match Envelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.health.record_malformed();
                warn!(
                    connection = %self.shared.connection,
                    payload_len = payload.len(),
                    error = %err,
                    "dropping malformed envelope"
                );
                return;
            }
        };

        match self.liveness.handle_inbound(&envelope) {
            LivenessResult::PongReceived(Some(rtt)) => self.health.record_rtt(rtt),
            LivenessResult::PongReceived(None) | LivenessResult::PingReceived => {}
            LivenessResult::NotLiveness => {
                self.health.record_message();
                if self.shared.debug {
                    debug!(
                        connection = %self.shared.connection,
                        kind = %envelope.kind,
                        sender = envelope.sender.as_deref().unwrap_or(""),
                        "received envelope"
                    );
                }
                self.shared.dispatch_message(envelope);
            }
        }
    }

    fn handle_transport_lost(&mut self, reason: CloseReason) {
        info!(
            connection = %self.shared.connection,
            code = reason.code,
            reason = %reason.reason,
            uptime_ms = self.health.uptime().as_millis() as u64,
            "websocket closed"
        );
        self.teardown_transport();
        self.enter_closed(reason);
    }

    fn enter_closed(&mut self, reason: CloseReason) {
        self.set_state(ConnectionState::Closed);
        let note = reason.reason.clone();
        self.shared.dispatch_close(reason);
        // A callback may have disconnected or reconnected in the meantime.
        if self.status == ConnectionState::Closed {
            self.schedule_reconnect(&note);
        }
    }

    fn schedule_reconnect(&mut self, reason: &str) {
        let max_attempts = self.reconnect.max_attempts();
        let Some(delay) = self.reconnect.next_delay() else {
            let attempt = self.reconnect.attempts();
            error!(
                connection = %self.shared.connection,
                attempt,
                max_attempts,
                reason = %reason,
                "websocket reconnect attempts exhausted"
            );
            self.set_state(ConnectionState::Disconnected);
            self.shared.dispatch_reconnect(ReconnectAttempt {
                attempt,
                max_attempts,
                delay: None,
            });
            return;
        };

        let attempt = self.reconnect.attempts();
        self.shared.set_attempts(attempt);
        self.health.increment_reconnect();
        warn!(
            connection = %self.shared.connection,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "websocket reconnect scheduled"
        );

        let epoch = self.epoch;
        let actor_ref = self.actor_ref.clone();
        self.reconnect_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = actor_ref.tell(RealtimeEvent::ReconnectDue { epoch }).send().await;
        }));

        self.shared.dispatch_reconnect(ReconnectAttempt {
            attempt,
            max_attempts,
            delay: Some(delay),
        });
    }

    fn handle_disconnect(&mut self) {
        let was_open = self.status == ConnectionState::Open;
        self.cancel_timers();
        if was_open {
            self.shared
                .push_frame(WsFrame::close(NORMAL_CLOSURE, "client disconnect"));
        }
        self.teardown_transport();
        self.reconnect.reset();
        self.shared.set_attempts(0);

        if self.status != ConnectionState::Disconnected {
            info!(connection = %self.shared.connection, state = %self.status, "websocket disconnected by client");
        }
        self.set_state(ConnectionState::Disconnected);
        if was_open {
            self.shared
                .dispatch_close(CloseReason::normal("client disconnect"));
        }
    }

    fn cancel_timers(&mut self) {
        if let Some(handle) = self.reconnect_task.take() {
            handle.abort();
        }
        if let Some(handle) = self.connect_task.take() {
            handle.abort();
        }
    }

    /// Stops the reader and heartbeat of the current transport and releases the outbound
    /// queue. The writer task flushes what is queued, then closes the socket.
    fn teardown_transport(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.heartbeat_task.take() {
            handle.abort();
        }
        if let Some(handle) = self.reader_task.take() {
            handle.abort();
        }
        self.shared.clear_outbound();
        self.liveness.reset();
        self.epoch = self.epoch.wrapping_add(1);
    }
}
