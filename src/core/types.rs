use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::frame::{ABNORMAL_CLOSURE, NORMAL_CLOSURE, WsCloseFrame};

/// Convenience result alias for realtime client operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Canonical error surface of the realtime client.
///
/// None of these are returned to consumers for runtime failures: they are logged and routed
/// through the on-error callback / event stream. `Clone` so events can be broadcast.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RealtimeError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport error ({context}): {error}")]
    Transport {
        context: &'static str,
        error: String,
    },

    #[error("Parse failed: {0}")]
    Parse(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Not open: connection is {0}")]
    NotOpen(ConnectionState),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Actor error: {0}")]
    Actor(String),
}

impl From<sonic_rs::Error> for RealtimeError {
    fn from(err: sonic_rs::Error) -> Self {
        RealtimeError::Serialization(err.to_string())
    }
}

impl From<envy::Error> for RealtimeError {
    fn from(err: envy::Error) -> Self {
        RealtimeError::Config(err.to_string())
    }
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No transport, no timers.
    #[default]
    Idle,
    Connecting,
    Open,
    /// Transport gone; a retry may be pending.
    Closed,
    /// Terminal for the session: explicit disconnect or attempts exhausted.
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
            ConnectionState::Disconnected => "disconnected",
        }
    }

    /// States in which `connect()` is a no-op.
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a transport closed, as reported to the on-close callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(NORMAL_CLOSURE, reason)
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(ABNORMAL_CLOSURE, reason)
    }

    pub fn from_frame(frame: Option<&WsCloseFrame>) -> Self {
        match frame {
            Some(frame) => Self::new(frame.code, frame.reason_lossy()),
            None => Self::abnormal("remote closed"),
        }
    }

    pub fn is_normal(&self) -> bool {
        self.code == NORMAL_CLOSURE
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code={} reason={}", self.code, self.reason)
    }
}

/// Report passed to the on-reconnect-attempt callback.
///
/// `delay == None` marks exhaustion: no further retry is scheduled and the client is
/// `Disconnected` until the consumer calls `connect()` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectAttempt {
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Option<Duration>,
}

impl ReconnectAttempt {
    pub fn is_exhausted(&self) -> bool {
        self.delay.is_none()
    }
}

/// Abstract reconnect strategy.
pub trait ReconnectStrategy: Send + Sync + 'static {
    /// Delay before the next attempt, advancing the attempt counter, or `None` once the
    /// attempt budget is spent.
    fn next_delay(&mut self) -> Option<Duration>;
    /// Attempts scheduled since the last reset.
    fn attempts(&self) -> u32;
    fn max_attempts(&self) -> u32;
    fn reset(&mut self);
}

/// Basic connection statistics snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub state: ConnectionState,
    pub uptime: Duration,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub malformed_dropped: u64,
    pub heartbeats_sent: u64,
    pub reconnects: u64,
    pub reconnect_attempt: u32,
    pub history_len: usize,
    pub rtt_samples: u64,
    pub p50_rtt_us: u64,
    pub p99_rtt_us: u64,
}
