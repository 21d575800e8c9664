//! Envelope wire type and the ward payloads it carries.
//!
//! Wire shape (JSON, both directions):
//! `{"type": <kind>, "data": <payload>, "timestamp": <RFC 3339>, "sender"?: .., "event"?: ..}`

use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sonic_rs::Value;

use super::types::{RealtimeError, RealtimeResult};

/// Current time as sent on the wire: UTC, millisecond precision, `Z` suffix.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time as Unix epoch milliseconds (heartbeat payloads).
pub fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Discriminated envelope kind. Unknown tags are preserved verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnvelopeKind {
    PatientSelected,
    PatientUpdated,
    ProcedureUpdated,
    AppointmentUpdated,
    AppointmentCreated,
    ObservationAdded,
    FormUpdated,
    PrintJobStatus,
    SyncStatus,
    Notification,
    Error,
    Heartbeat,
    Subscribe,
    Unsubscribe,
    Other(String),
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &str {
        match self {
            EnvelopeKind::PatientSelected => "patient_selected",
            EnvelopeKind::PatientUpdated => "patient_updated",
            EnvelopeKind::ProcedureUpdated => "procedure_updated",
            EnvelopeKind::AppointmentUpdated => "appointment_updated",
            EnvelopeKind::AppointmentCreated => "appointment_created",
            EnvelopeKind::ObservationAdded => "observation_added",
            EnvelopeKind::FormUpdated => "form_updated",
            EnvelopeKind::PrintJobStatus => "print_job_status",
            EnvelopeKind::SyncStatus => "sync_status",
            EnvelopeKind::Notification => "notification",
            EnvelopeKind::Error => "error",
            EnvelopeKind::Heartbeat => "heartbeat",
            EnvelopeKind::Subscribe => "subscribe",
            EnvelopeKind::Unsubscribe => "unsubscribe",
            EnvelopeKind::Other(tag) => tag.as_str(),
        }
    }

    pub fn is_liveness(&self) -> bool {
        matches!(self, EnvelopeKind::Heartbeat)
    }
}

impl From<&str> for EnvelopeKind {
    fn from(tag: &str) -> Self {
        match tag {
            "patient_selected" => EnvelopeKind::PatientSelected,
            "patient_updated" => EnvelopeKind::PatientUpdated,
            "procedure_updated" => EnvelopeKind::ProcedureUpdated,
            "appointment_updated" => EnvelopeKind::AppointmentUpdated,
            "appointment_created" => EnvelopeKind::AppointmentCreated,
            "observation_added" => EnvelopeKind::ObservationAdded,
            "form_updated" => EnvelopeKind::FormUpdated,
            "print_job_status" => EnvelopeKind::PrintJobStatus,
            "sync_status" => EnvelopeKind::SyncStatus,
            "notification" => EnvelopeKind::Notification,
            "error" => EnvelopeKind::Error,
            "heartbeat" => EnvelopeKind::Heartbeat,
            "subscribe" => EnvelopeKind::Subscribe,
            "unsubscribe" => EnvelopeKind::Unsubscribe,
            other => EnvelopeKind::Other(other.to_string()),
        }
    }
}

impl From<String> for EnvelopeKind {
    fn from(tag: String) -> Self {
        match EnvelopeKind::from(tag.as_str()) {
            EnvelopeKind::Other(_) => EnvelopeKind::Other(tag),
            known => known,
        }
    }
}

impl From<EnvelopeKind> for String {
    fn from(kind: EnvelopeKind) -> Self {
        match kind {
            EnvelopeKind::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single typed message exchanged over the realtime connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Alternate kind discriminator some dashboards send alongside `type`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

impl Envelope {
    pub fn new(kind: impl Into<EnvelopeKind>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: now_timestamp(),
            sender: None,
            event: None,
        }
    }

    /// Builds an envelope whose `data` is the serialized `payload`.
    pub fn with_payload<T>(kind: impl Into<EnvelopeKind>, payload: &T) -> RealtimeResult<Self>
    where
        T: Serialize + ?Sized,
    {
        let data = sonic_rs::to_value(payload)?;
        Ok(Self::new(kind, data))
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Overwrites the timestamp with the current time.
    pub fn stamp(&mut self) {
        self.timestamp = now_timestamp();
    }

    pub fn is_liveness(&self) -> bool {
        self.kind.is_liveness()
    }

    pub fn encode(&self) -> RealtimeResult<String> {
        Ok(sonic_rs::to_string(self)?)
    }

    pub fn decode(bytes: &[u8]) -> RealtimeResult<Self> {
        sonic_rs::from_slice(bytes).map_err(|err| RealtimeError::Parse(err.to_string()))
    }

    /// Interprets `data` as a kind-specific payload.
    pub fn payload<T: DeserializeOwned>(&self) -> RealtimeResult<T> {
        sonic_rs::from_value(&self.data).map_err(|err| {
            RealtimeError::Parse(format!("{} payload: {err}", self.kind))
        })
    }
}

/// Server-interpreted subscription scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    Patient(u64),
    Room(u64),
    User(u64),
    Custom(String),
}

impl ChannelKey {
    pub fn subscription_payload(&self) -> SubscriptionPayload {
        let mut payload = SubscriptionPayload::channel(self.to_string());
        match self {
            ChannelKey::Patient(id) => payload.patient_id = Some(*id),
            ChannelKey::Room(id) => payload.room_id = Some(*id),
            ChannelKey::User(id) => payload.user_id = Some(*id),
            ChannelKey::Custom(_) => {}
        }
        payload
    }

    /// Unsubscribe requests name the channel only.
    pub fn unsubscription_payload(&self) -> SubscriptionPayload {
        SubscriptionPayload::channel(self.to_string())
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKey::Patient(id) => write!(f, "patient:{id}"),
            ChannelKey::Room(id) => write!(f, "room:{id}"),
            ChannelKey::User(id) => write!(f, "user:{id}"),
            ChannelKey::Custom(key) => f.write_str(key),
        }
    }
}

impl FromStr for ChannelKey {
    type Err = std::convert::Infallible;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        Ok(ChannelKey::from(key))
    }
}

impl From<&str> for ChannelKey {
    fn from(key: &str) -> Self {
        let typed = key.split_once(':').and_then(|(scope, id)| {
            let id = id.parse::<u64>().ok()?;
            match scope {
                "patient" => Some(ChannelKey::Patient(id)),
                "room" => Some(ChannelKey::Room(id)),
                "user" => Some(ChannelKey::User(id)),
                _ => None,
            }
        });
        typed.unwrap_or_else(|| ChannelKey::Custom(key.to_string()))
    }
}

impl From<String> for ChannelKey {
    fn from(key: String) -> Self {
        ChannelKey::from(key.as_str())
    }
}

/// `data` of `subscribe` / `unsubscribe` envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPayload {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
}

impl SubscriptionPayload {
    pub fn channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            patient_id: None,
            room_id: None,
            user_id: None,
        }
    }
}

/// `data` of `heartbeat` envelopes. Pings carry `ping`, server replies carry `pong`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pong: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientSelected {
    pub patient_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    pub room_number: String,
    pub bed_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureUpdated {
    pub procedure_id: u64,
    pub patient_id: u64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationAdded {
    pub observation_id: u64,
    pub patient_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blood_pressure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pulse: Option<u32>,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default)]
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn kinds_round_trip_through_their_wire_tags() {
        assert_eq!(
            EnvelopeKind::from("procedure_updated"),
            EnvelopeKind::ProcedureUpdated
        );
        assert_eq!(String::from(EnvelopeKind::Heartbeat), "heartbeat");
        assert_eq!(
            EnvelopeKind::from("bed_cleaned".to_string()),
            EnvelopeKind::Other("bed_cleaned".to_string())
        );
        assert!(EnvelopeKind::Heartbeat.is_liveness());
        assert!(!EnvelopeKind::Notification.is_liveness());
    }

    #[test]
    fn decodes_inbound_envelope_with_optional_fields() {
        let raw = br#"{"type":"procedure_updated","data":{"procedure_id":7,"patient_id":42,"status":"done"},"timestamp":"2024-05-01T10:00:00.000Z","sender":"nurse-station"}"#;
        let envelope = Envelope::decode(raw).expect("valid envelope");
        assert_eq!(envelope.kind, EnvelopeKind::ProcedureUpdated);
        assert_eq!(envelope.sender.as_deref(), Some("nurse-station"));
        assert!(envelope.event.is_none());

        let payload: ProcedureUpdated = envelope.payload().expect("typed payload");
        assert_eq!(payload.procedure_id, 7);
        assert_eq!(payload.patient_id, 42);
        assert_eq!(payload.status, "done");
    }

    #[test]
    fn missing_data_and_timestamp_default() {
        let envelope = Envelope::decode(br#"{"type":"sync_status"}"#).expect("valid envelope");
        assert_eq!(envelope.kind, EnvelopeKind::SyncStatus);
        assert!(envelope.timestamp.is_empty());
    }

    #[test]
    fn malformed_bodies_are_parse_errors() {
        assert!(matches!(
            Envelope::decode(b"not json"),
            Err(RealtimeError::Parse(_))
        ));
        assert!(matches!(
            Envelope::decode(br#"{"data":{}}"#),
            Err(RealtimeError::Parse(_))
        ));
    }

    #[test]
    fn encode_omits_absent_optionals() {
        let envelope = Envelope::with_payload(
            EnvelopeKind::Subscribe,
            &ChannelKey::Room(3).subscription_payload(),
        )
        .expect("serializable payload");
        let encoded = envelope.encode().expect("encodable");
        assert!(encoded.contains(r#""type":"subscribe""#));
        assert!(encoded.contains(r#""channel":"room:3""#));
        assert!(encoded.contains(r#""room_id":3"#));
        assert!(!encoded.contains("sender"));
        assert!(!encoded.contains("patient_id"));
    }

    #[test]
    fn stamp_produces_rfc3339_millis() {
        let mut envelope = Envelope::new(EnvelopeKind::Notification, Value::default());
        envelope.timestamp = "stale".to_string();
        envelope.stamp();
        assert!(envelope.timestamp.ends_with('Z'));
        assert!(DateTime::parse_from_rfc3339(&envelope.timestamp).is_ok());
    }

    #[test]
    fn channel_keys_parse_typed_scopes() {
        assert_eq!(ChannelKey::from("patient:42"), ChannelKey::Patient(42));
        assert_eq!(ChannelKey::from("room:7"), ChannelKey::Room(7));
        assert_eq!(ChannelKey::from("user:1"), ChannelKey::User(1));
        assert_eq!(
            ChannelKey::from("patient:abc"),
            ChannelKey::Custom("patient:abc".to_string())
        );
        assert_eq!(ChannelKey::from("ward-broadcast").to_string(), "ward-broadcast");

        let payload = ChannelKey::Patient(42).subscription_payload();
        assert_eq!(payload.channel, "patient:42");
        assert_eq!(payload.patient_id, Some(42));
        assert_eq!(payload.room_id, None);
    }

    #[test]
    fn unsubscribe_payload_names_only_the_channel() {
        let payload = ChannelKey::Patient(42).unsubscription_payload();
        assert_eq!(payload, SubscriptionPayload::channel("patient:42"));
    }

    #[test]
    fn notification_level_uses_type_field() {
        let raw = br#"{"type":"notification","data":{"type":"warning","title":"Bed 4","message":"Vitals overdue"}}"#;
        let envelope = Envelope::decode(raw).expect("valid envelope");
        let note: Notification = envelope.payload().expect("notification payload");
        assert_eq!(note.level, NotificationLevel::Warning);
        assert_eq!(note.title, "Bed 4");
    }
}
