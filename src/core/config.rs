//! Client options and environment-driven settings.

use std::time::Duration;

use serde::Deserialize;

use super::types::RealtimeResult;

pub const DEFAULT_URL: &str = "ws://localhost:8000/ws";
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(30_000);
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

const ENV_PREFIX: &str = "WARD_WS_";

/// Connection options. Every field has a default.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base delay of the linear back-off (retry N waits `N × reconnect_interval`).
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
    /// Unanswered-ping timeout. `None` disables stale detection.
    pub heartbeat_timeout: Option<Duration>,
    /// Inbound envelopes kept for display/debugging.
    pub history_capacity: usize,
    /// Per-envelope debug logging.
    pub debug: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: None,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            debug: false,
        }
    }
}

impl ClientConfig {
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Settings read from `WARD_WS_*` environment variables (and `.env`).
///
/// | Variable | Default |
/// |---|---|
/// | `WARD_WS_URL` | `ws://localhost:8000/ws` |
/// | `WARD_WS_CLIENT_ID` | unset |
/// | `WARD_WS_RECONNECT_INTERVAL_MS` | 5000 |
/// | `WARD_WS_MAX_RECONNECT_ATTEMPTS` | 10 |
/// | `WARD_WS_HEARTBEAT_INTERVAL_MS` | 30000 |
/// | `WARD_WS_HEARTBEAT_TIMEOUT_MS` | unset |
/// | `WARD_WS_HISTORY_CAPACITY` | 50 |
/// | `WARD_WS_DEBUG` | false |
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ClientSettings {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default)]
    pub heartbeat_timeout_ms: Option<u64>,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default)]
    pub debug: bool,
}

fn default_url() -> String {
    DEFAULT_URL.to_string()
}

fn default_reconnect_interval_ms() -> u64 {
    DEFAULT_RECONNECT_INTERVAL.as_millis() as u64
}

fn default_max_reconnect_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

fn default_heartbeat_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

impl ClientSettings {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> RealtimeResult<Self> {
        dotenvy::dotenv().ok();
        Ok(envy::prefixed(ENV_PREFIX).from_env::<Self>()?)
    }

    /// Reads settings from explicit `(name, value)` pairs using the same variable names.
    pub fn from_vars<I>(vars: I) -> RealtimeResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::prefixed(ENV_PREFIX).from_iter(vars)?)
    }

    pub fn address(&self) -> String {
        compose_address(&self.url, self.client_id.as_deref())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            heartbeat_timeout: self.heartbeat_timeout_ms.map(Duration::from_millis),
            history_capacity: self.history_capacity,
            debug: self.debug,
        }
    }
}

/// `base/<client_id>`, or `base` when no (non-empty) client id is given.
pub fn compose_address(base: &str, client_id: Option<&str>) -> String {
    match client_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => format!("{}/{}", base.trim_end_matches('/'), id),
        None => base.to_string(),
    }
}
