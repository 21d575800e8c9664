//! Consumer-facing connection handle.
//!
//! A [`ConnectionHandle`] is cheap to clone. Sends, subscription helpers and status queries are
//! synchronous: they go through state shared with the connection actor. Lifecycle operations
//! (`connect`, `disconnect`, `stats`, `shutdown`) are messages to the actor.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use kameo::prelude::{Actor, ActorRef};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use super::actor::{Disconnect, GetStats, RealtimeActor, RealtimeActorArgs, RealtimeEvent};
use super::handlers::{ClientEvent, EventHandlers};
use crate::core::{
    ChannelKey, CircularBuffer, ClientConfig, ClientHeartbeat, ClientSettings, ClientStats,
    CloseReason, ConnectionState, Envelope, EnvelopeKind, LinearBackoffReconnect,
    ObservationAdded, PatientSelected, ProcedureUpdated, RealtimeError, RealtimeResult,
    ReconnectAttempt, WsFrame, compose_address, now_timestamp,
};
use crate::transport::WsTransport;
use crate::transport::tungstenite::TungsteniteTransport;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// State shared between the actor and every handle clone.
///
/// Locks are never held while a callback runs: callbacks are cloned out first so they may call
/// back into the handle.
pub(crate) struct SharedState {
    pub(crate) connection: String,
    pub(crate) client_id: Option<String>,
    pub(crate) debug: bool,
    state_tx: watch::Sender<ConnectionState>,
    attempts: AtomicU32,
    sent: AtomicU64,
    outbound: Mutex<Option<mpsc::UnboundedSender<WsFrame>>>,
    handlers: RwLock<EventHandlers>,
    events: broadcast::Sender<ClientEvent>,
    history: Mutex<CircularBuffer<Envelope>>,
}

impl SharedState {
    pub(crate) fn new(connection: String, client_id: Option<String>, config: &ClientConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            connection,
            client_id,
            debug: config.debug,
            state_tx,
            attempts: AtomicU32::new(0),
            sent: AtomicU64::new(0),
            outbound: Mutex::new(None),
            handlers: RwLock::new(EventHandlers::default()),
            events,
            history: Mutex::new(CircularBuffer::new(config.history_capacity)),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub(crate) fn publish_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    pub(crate) fn set_attempts(&self, attempts: u32) {
        self.attempts.store(attempts, Ordering::Release);
    }

    pub(crate) fn messages_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub(crate) fn install_outbound(&self, tx: mpsc::UnboundedSender<WsFrame>) {
        *self.outbound.lock() = Some(tx);
    }

    /// Drops the queue sender; the writer task finishes what is queued and closes the sink.
    pub(crate) fn clear_outbound(&self) {
        self.outbound.lock().take();
    }

    /// Queues a frame on the live transport. `false` when there is none.
    pub(crate) fn push_frame(&self, frame: WsFrame) -> bool {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    pub(crate) fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    fn unhandled(&self, event: &'static str) {
        if self.debug {
            debug!(connection = %self.connection, event, "no callback registered");
        }
    }

    pub(crate) fn dispatch_message(&self, envelope: Envelope) {
        self.history.lock().push(envelope.clone());
        let callback = self.handlers.read().on_message.clone();
        match callback {
            Some(cb) => cb(&envelope),
            None => self.unhandled("message"),
        }
        let _ = self.events.send(ClientEvent::Message(envelope));
    }

    pub(crate) fn dispatch_open(&self) {
        let callback = self.handlers.read().on_open.clone();
        match callback {
            Some(cb) => cb(),
            None => self.unhandled("open"),
        }
        let _ = self.events.send(ClientEvent::Opened);
    }

    pub(crate) fn dispatch_close(&self, reason: CloseReason) {
        let callback = self.handlers.read().on_close.clone();
        match callback {
            Some(cb) => cb(&reason),
            None => self.unhandled("close"),
        }
        let _ = self.events.send(ClientEvent::Closed(reason));
    }

    pub(crate) fn dispatch_error(&self, error: RealtimeError) {
        let callback = self.handlers.read().on_error.clone();
        match callback {
            Some(cb) => cb(&error),
            None => self.unhandled("error"),
        }
        let _ = self.events.send(ClientEvent::Error(error));
    }

    pub(crate) fn dispatch_reconnect(&self, attempt: ReconnectAttempt) {
        let callback = self.handlers.read().on_reconnect_attempt.clone();
        match callback {
            Some(cb) => cb(attempt),
            None => self.unhandled("reconnect_attempt"),
        }
        let event = if attempt.is_exhausted() {
            ClientEvent::Exhausted(attempt)
        } else {
            ClientEvent::ReconnectScheduled(attempt)
        };
        let _ = self.events.send(event);
    }
}

/// Opens a connection to `base_url` (plus `/<client_id>` when given) and returns its handle.
///
/// Never fails: an unusable address or an unreachable endpoint goes through the error
/// callbacks and the retry policy.
pub async fn connect(
    base_url: &str,
    client_id: Option<&str>,
    config: ClientConfig,
) -> ConnectionHandle {
    let handle = ConnectionHandle::new(base_url, client_id, config);
    handle.connect().await;
    handle
}

/// Handle to one realtime connection.
pub struct ConnectionHandle<T: WsTransport = TungsteniteTransport> {
    actor: ActorRef<RealtimeActor<T>>,
    shared: Arc<SharedState>,
}

impl<T: WsTransport> Clone for ConnectionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            actor: self.actor.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl ConnectionHandle<TungsteniteTransport> {
    /// Spawns an idle connection over tokio-tungstenite. Call [`ConnectionHandle::connect`]
    /// to open it.
    pub fn new(base_url: &str, client_id: Option<&str>, config: ClientConfig) -> Self {
        Self::with_transport(TungsteniteTransport, base_url, client_id, config)
    }

    /// Spawns an idle connection configured from `WARD_WS_*` settings.
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self::new(
            &settings.url,
            settings.client_id.as_deref(),
            settings.client_config(),
        )
    }
}

impl<T: WsTransport> ConnectionHandle<T> {
    pub fn with_transport(
        transport: T,
        base_url: &str,
        client_id: Option<&str>,
        config: ClientConfig,
    ) -> Self {
        let address = compose_address(base_url, client_id);
        let client_id = client_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let connection = client_id.clone().unwrap_or_else(|| address.clone());
        let shared = Arc::new(SharedState::new(connection, client_id, &config));

        let actor = RealtimeActor::spawn(RealtimeActorArgs {
            address,
            transport,
            reconnect: LinearBackoffReconnect::new(
                config.reconnect_interval,
                config.max_reconnect_attempts,
            ),
            liveness: ClientHeartbeat::new(config.heartbeat_interval, config.heartbeat_timeout),
            shared: Arc::clone(&shared),
        });

        Self { actor, shared }
    }

    /// Starts connecting. No-op while connecting or open.
    pub async fn connect(&self) {
        if let Err(err) = self.actor.tell(RealtimeEvent::Connect).send().await {
            warn!(connection = %self.shared.connection, error = %err, "connect request not delivered");
        }
    }

    /// Closes the connection with code 1000 and cancels every pending timer. Idempotent.
    pub async fn disconnect(&self) {
        if let Err(err) = self.actor.ask(Disconnect).await {
            warn!(connection = %self.shared.connection, error = %err, "disconnect request not delivered");
        }
    }

    /// Disconnects and stops the connection actor. Handles are inert afterwards.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        let _ = self.actor.stop_gracefully().await;
        self.actor.wait_for_shutdown().await;
        info!(connection = %self.shared.connection, "realtime connection shut down");
    }

    /// Stamps `envelope` with the current time and queues it on the open connection.
    ///
    /// Returns `false` (and writes nothing) when the connection is not open or the envelope
    /// cannot be serialized.
    pub fn send(&self, mut envelope: Envelope) -> bool {
        let state = self.shared.state();
        if state != ConnectionState::Open {
            warn!(
                connection = %self.shared.connection,
                kind = %envelope.kind,
                error = %RealtimeError::NotOpen(state),
                "envelope not sent"
            );
            return false;
        }

        envelope.stamp();
        let text = match envelope.encode() {
            Ok(text) => text,
            Err(err) => {
                warn!(connection = %self.shared.connection, kind = %envelope.kind, error = %err, "envelope not sent");
                return false;
            }
        };

        if !self.shared.push_frame(WsFrame::text(text)) {
            warn!(connection = %self.shared.connection, kind = %envelope.kind, "outbound queue closed; envelope not sent");
            return false;
        }
        self.shared.sent.fetch_add(1, Ordering::Relaxed);
        if self.shared.debug {
            debug!(connection = %self.shared.connection, kind = %envelope.kind, "envelope sent");
        }
        true
    }

    /// Serializes `payload` as the `data` of a `kind` envelope and sends it.
    pub fn send_payload<P: Serialize>(&self, kind: impl Into<EnvelopeKind>, payload: &P) -> bool {
        match Envelope::with_payload(kind, payload) {
            Ok(envelope) => self.send(envelope),
            Err(err) => {
                warn!(connection = %self.shared.connection, error = %err, "payload not serializable");
                false
            }
        }
    }

    pub fn subscribe_to_channel(&self, channel: impl Into<ChannelKey>) -> bool {
        let channel = channel.into();
        self.send_payload(EnvelopeKind::Subscribe, &channel.subscription_payload())
    }

    pub fn unsubscribe_from_channel(&self, channel: impl Into<ChannelKey>) -> bool {
        let channel = channel.into();
        self.send_payload(EnvelopeKind::Unsubscribe, &channel.unsubscription_payload())
    }

    pub fn subscribe_to_patient(&self, patient_id: u64) -> bool {
        self.subscribe_to_channel(ChannelKey::Patient(patient_id))
    }

    pub fn subscribe_to_room(&self, room_id: u64) -> bool {
        self.subscribe_to_channel(ChannelKey::Room(room_id))
    }

    pub fn subscribe_to_user(&self, user_id: u64) -> bool {
        self.subscribe_to_channel(ChannelKey::User(user_id))
    }

    /// Announces the patient shown on this dashboard. The client id is filled in when set.
    pub fn send_patient_selected(&self, mut selection: PatientSelected) -> bool {
        if selection.client_id.is_none() {
            selection.client_id = self.shared.client_id.clone();
        }
        if selection.timestamp.is_empty() {
            selection.timestamp = now_timestamp();
        }
        self.send_payload(EnvelopeKind::PatientSelected, &selection)
    }

    pub fn send_procedure_updated(&self, mut update: ProcedureUpdated) -> bool {
        if update.client_id.is_none() {
            update.client_id = self.shared.client_id.clone();
        }
        if update.timestamp.is_empty() {
            update.timestamp = now_timestamp();
        }
        self.send_payload(EnvelopeKind::ProcedureUpdated, &update)
    }

    pub fn send_observation_added(&self, mut observation: ObservationAdded) -> bool {
        if observation.timestamp.is_empty() {
            observation.timestamp = now_timestamp();
        }
        self.send_payload(EnvelopeKind::ObservationAdded, &observation)
    }

    /// Merges `handlers` into the registered set; later registrations win per slot.
    pub fn set_handlers(&self, handlers: EventHandlers) {
        self.shared.handlers.write().merge(handlers);
    }

    pub fn on_open(&self, f: impl Fn() + Send + Sync + 'static) {
        self.set_handlers(EventHandlers::new().on_open(f));
    }

    pub fn on_message(&self, f: impl Fn(&Envelope) + Send + Sync + 'static) {
        self.set_handlers(EventHandlers::new().on_message(f));
    }

    pub fn on_close(&self, f: impl Fn(&CloseReason) + Send + Sync + 'static) {
        self.set_handlers(EventHandlers::new().on_close(f));
    }

    pub fn on_error(&self, f: impl Fn(&RealtimeError) + Send + Sync + 'static) {
        self.set_handlers(EventHandlers::new().on_error(f));
    }

    pub fn on_reconnect_attempt(&self, f: impl Fn(ReconnectAttempt) + Send + Sync + 'static) {
        self.set_handlers(EventHandlers::new().on_reconnect_attempt(f));
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state() == ConnectionState::Open
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Retries scheduled since the connection was last open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// Snapshot of the retained inbound envelopes, oldest first.
    pub fn recent_messages(&self) -> Vec<Envelope> {
        self.shared.history.lock().to_vec()
    }

    pub fn clear_history(&self) {
        self.shared.history.lock().clear();
    }

    pub async fn stats(&self) -> RealtimeResult<ClientStats> {
        self.actor
            .ask(GetStats)
            .await
            .map_err(|err| RealtimeError::Actor(err.to_string()))
    }
}
