use std::time::Duration;

use tokio::time::Instant;

use super::envelope::{Envelope, EnvelopeKind, HeartbeatPayload, now_epoch_ms};

/// Outcome of offering an inbound envelope to the liveness strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessResult {
    /// Regular envelope; dispatch it.
    NotLiveness,
    /// Server reply to one of our pings, with the round trip when a ping was outstanding.
    PongReceived(Option<Duration>),
    /// Server-initiated heartbeat. Consumed, never echoed.
    PingReceived,
}

/// Liveness contract between the client and the push endpoint.
pub trait LivenessStrategy: Send + Sync + 'static {
    fn create_ping(&mut self) -> Option<Envelope>;
    fn handle_inbound(&mut self, envelope: &Envelope) -> LivenessResult;
    fn is_stale(&self) -> bool;
    fn reset(&mut self);
    fn interval(&self) -> Duration;
}

/// Client-initiated heartbeat.
///
/// Every `interval` the client sends `{type:"heartbeat", data:{ping:<unix ms>}}`. A heartbeat
/// carrying `pong` is the server reply. When `timeout` is set, the connection is stale once the
/// oldest unanswered ping is older than `timeout`.
#[derive(Debug, Clone)]
pub struct ClientHeartbeat {
    interval: Duration,
    timeout: Option<Duration>,
    last_ping: Option<Instant>,
    unanswered_since: Option<Instant>,
}

impl ClientHeartbeat {
    pub fn new(interval: Duration, timeout: Option<Duration>) -> Self {
        Self {
            interval,
            timeout,
            last_ping: None,
            unanswered_since: None,
        }
    }
}

impl Default for ClientHeartbeat {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), None)
    }
}

impl LivenessStrategy for ClientHeartbeat {
    fn create_ping(&mut self) -> Option<Envelope> {
        let payload = HeartbeatPayload {
            ping: Some(now_epoch_ms()),
            pong: None,
        };
        let envelope = Envelope::with_payload(EnvelopeKind::Heartbeat, &payload).ok()?;
        let now = Instant::now();
        self.last_ping = Some(now);
        self.unanswered_since.get_or_insert(now);
        Some(envelope)
    }

    fn handle_inbound(&mut self, envelope: &Envelope) -> LivenessResult {
        if !envelope.is_liveness() {
            return LivenessResult::NotLiveness;
        }

        let payload = envelope.payload::<HeartbeatPayload>().unwrap_or_default();
        if payload.pong.is_some() {
            let now = Instant::now();
            let rtt = self
                .last_ping
                .map(|sent| now.saturating_duration_since(sent));
            self.unanswered_since = None;
            LivenessResult::PongReceived(rtt)
        } else {
            LivenessResult::PingReceived
        }
    }

    fn is_stale(&self) -> bool {
        match (self.timeout, self.unanswered_since) {
            (Some(timeout), Some(since)) => since.elapsed() > timeout,
            _ => false,
        }
    }

    fn reset(&mut self) {
        self.last_ping = None;
        self.unanswered_since = None;
    }

    fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonic_rs::Value;

    fn heartbeat(payload: HeartbeatPayload) -> Envelope {
        Envelope::with_payload(EnvelopeKind::Heartbeat, &payload).expect("heartbeat payload")
    }

    #[test]
    fn ping_carries_epoch_millis() {
        let mut strategy = ClientHeartbeat::new(Duration::from_secs(25), None);
        let ping = strategy.create_ping().expect("ping should be generated");
        assert_eq!(ping.kind, EnvelopeKind::Heartbeat);
        let payload: HeartbeatPayload = ping.payload().expect("heartbeat payload");
        assert!(payload.ping.is_some());
        assert!(payload.pong.is_none());
    }

    #[test]
    fn classifies_pong_ping_and_regular_envelopes() {
        let mut strategy = ClientHeartbeat::new(Duration::from_secs(25), None);
        strategy.create_ping();

        let pong = heartbeat(HeartbeatPayload {
            ping: None,
            pong: Some(1),
        });
        assert!(matches!(
            strategy.handle_inbound(&pong),
            LivenessResult::PongReceived(Some(_))
        ));

        let server_ping = heartbeat(HeartbeatPayload {
            ping: Some(1),
            pong: None,
        });
        assert_eq!(
            strategy.handle_inbound(&server_ping),
            LivenessResult::PingReceived
        );

        let regular = Envelope::new(EnvelopeKind::PatientUpdated, Value::default());
        assert_eq!(
            strategy.handle_inbound(&regular),
            LivenessResult::NotLiveness
        );
    }

    #[test]
    fn pong_without_outstanding_ping_has_no_rtt() {
        let mut strategy = ClientHeartbeat::default();
        let pong = heartbeat(HeartbeatPayload {
            ping: None,
            pong: Some(5),
        });
        assert_eq!(
            strategy.handle_inbound(&pong),
            LivenessResult::PongReceived(None)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_ping_goes_stale_after_timeout() {
        let mut strategy =
            ClientHeartbeat::new(Duration::from_secs(5), Some(Duration::from_secs(10)));
        assert!(!strategy.is_stale());

        strategy.create_ping();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(strategy.is_stale());

        strategy.handle_inbound(&heartbeat(HeartbeatPayload {
            ping: None,
            pong: Some(1),
        }));
        assert!(!strategy.is_stale());

        strategy.reset();
        assert!(!strategy.is_stale());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_pings_without_reply_go_stale() {
        let mut strategy =
            ClientHeartbeat::new(Duration::from_secs(5), Some(Duration::from_secs(12)));
        for _ in 0..3 {
            strategy.create_ping();
            assert!(!strategy.is_stale());
            tokio::time::advance(Duration::from_secs(5)).await;
        }
        assert!(strategy.is_stale(), "first ping is 15s old with no reply");
    }

    #[tokio::test(start_paused = true)]
    async fn no_timeout_never_goes_stale() {
        let mut strategy = ClientHeartbeat::new(Duration::from_secs(5), None);
        strategy.create_ping();
        tokio::time::advance(Duration::from_secs(3_600)).await;
        assert!(!strategy.is_stale());
    }
}
