//! Kameo-based realtime notification client for ward dashboards.
//!
//! One [`ConnectionHandle`] per push endpoint: it reconnects with linear back-off, keeps the
//! connection alive with client-initiated heartbeats and dispatches typed [`Envelope`]s to
//! callbacks and broadcast subscribers.

pub mod core;
pub mod testing;
pub mod tls;
pub mod transport;
pub mod ws;

pub use crate::core::{
    ChannelKey, ClientConfig, ClientSettings, ClientStats, CloseReason, ConnectionState,
    Envelope, EnvelopeKind, Notification, NotificationLevel, ObservationAdded, PatientSelected,
    ProcedureUpdated, RealtimeError, RealtimeResult, ReconnectAttempt,
};
pub use crate::ws::{ClientEvent, ConnectionHandle, EventHandlers, connect};
