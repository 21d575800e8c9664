use std::fmt;
use std::sync::Arc;

use crate::core::{CloseReason, Envelope, RealtimeError, ReconnectAttempt};

pub type OpenCallback = Arc<dyn Fn() + Send + Sync>;
pub type MessageCallback = Arc<dyn Fn(&Envelope) + Send + Sync>;
pub type CloseCallback = Arc<dyn Fn(&CloseReason) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&RealtimeError) + Send + Sync>;
pub type ReconnectCallback = Arc<dyn Fn(ReconnectAttempt) + Send + Sync>;

/// Named lifecycle callbacks.
///
/// Every slot is optional. An event without a callback still reaches `events()` subscribers
/// and is logged at debug level when the client runs with `debug` set. Registering
/// a set merges into the current one slot by slot, so a later registration overwrites only the
/// callbacks it provides.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub on_open: Option<OpenCallback>,
    pub on_message: Option<MessageCallback>,
    pub on_close: Option<CloseCallback>,
    pub on_error: Option<ErrorCallback>,
    pub on_reconnect_attempt: Option<ReconnectCallback>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_open(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(f));
        self
    }

    pub fn on_message(mut self, f: impl Fn(&Envelope) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    pub fn on_close(mut self, f: impl Fn(&CloseReason) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&RealtimeError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_reconnect_attempt(
        mut self,
        f: impl Fn(ReconnectAttempt) + Send + Sync + 'static,
    ) -> Self {
        self.on_reconnect_attempt = Some(Arc::new(f));
        self
    }

    /// Shallow merge: slots set in `other` replace ours, unset slots keep ours.
    pub fn merge(&mut self, other: EventHandlers) {
        let EventHandlers {
            on_open,
            on_message,
            on_close,
            on_error,
            on_reconnect_attempt,
        } = other;
        if on_open.is_some() {
            self.on_open = on_open;
        }
        if on_message.is_some() {
            self.on_message = on_message;
        }
        if on_close.is_some() {
            self.on_close = on_close;
        }
        if on_error.is_some() {
            self.on_error = on_error;
        }
        if on_reconnect_attempt.is_some() {
            self.on_reconnect_attempt = on_reconnect_attempt;
        }
    }
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_open", &self.on_open.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_reconnect_attempt", &self.on_reconnect_attempt.is_some())
            .finish()
    }
}

/// Connection events fanned out to every [`crate::ConnectionHandle::events`] receiver.
///
/// Unlike the named callbacks, any number of consumers can observe the same connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Opened,
    Message(Envelope),
    Closed(CloseReason),
    Error(RealtimeError),
    ReconnectScheduled(ReconnectAttempt),
    /// Attempt budget spent; the client stays disconnected until `connect()` is called again.
    Exhausted(ReconnectAttempt),
}
