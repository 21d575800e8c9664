use std::time::Duration;

use hdrhistogram::Histogram;
use tokio::time::Instant;

use super::types::{ClientStats, ConnectionState};

/// Health counters owned by the connection actor.
///
/// Counters survive reconnects; `reset` only restarts the uptime clock for a fresh transport.
#[derive(Debug)]
pub struct ConnectionHealth {
    connection_started: Instant,
    messages_received: u64,
    malformed_dropped: u64,
    heartbeats_sent: u64,
    reconnects: u64,
    rtt_histogram: Option<Histogram<u64>>,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self {
            connection_started: Instant::now(),
            messages_received: 0,
            malformed_dropped: 0,
            heartbeats_sent: 0,
            reconnects: 0,
            // Bounds are constants; construction only fails for invalid bounds.
            rtt_histogram: Histogram::new_with_bounds(1, 60_000_000, 3).ok(),
        }
    }

    pub fn reset(&mut self) {
        self.connection_started = Instant::now();
    }

    pub fn record_message(&mut self) {
        self.messages_received = self.messages_received.saturating_add(1);
    }

    pub fn record_malformed(&mut self) {
        self.malformed_dropped = self.malformed_dropped.saturating_add(1);
    }

    pub fn record_heartbeat(&mut self) {
        self.heartbeats_sent = self.heartbeats_sent.saturating_add(1);
    }

    pub fn increment_reconnect(&mut self) {
        self.reconnects = self.reconnects.saturating_add(1);
    }

    pub fn record_rtt(&mut self, rtt: Duration) {
        let micros = rtt.as_micros().clamp(1, u64::MAX as u128) as u64;
        if let Some(histogram) = self.rtt_histogram.as_mut() {
            let _ = histogram.record(micros);
        }
    }

    pub fn uptime(&self) -> Duration {
        self.connection_started.elapsed()
    }

    /// Snapshot of the actor-side counters. Handle-side fields (sent count, history length)
    /// are filled in by the caller.
    pub fn get_stats(&self, state: ConnectionState, reconnect_attempt: u32) -> ClientStats {
        let (rtt_samples, p50, p99) = match self.rtt_histogram.as_ref() {
            Some(histogram) if histogram.len() > 0 => (
                histogram.len(),
                histogram.value_at_percentile(50.0),
                histogram.value_at_percentile(99.0),
            ),
            _ => (0, 0, 0),
        };

        ClientStats {
            state,
            uptime: if state == ConnectionState::Open {
                self.uptime()
            } else {
                Duration::ZERO
            },
            messages_received: self.messages_received,
            messages_sent: 0,
            malformed_dropped: self.malformed_dropped,
            heartbeats_sent: self.heartbeats_sent,
            reconnects: self.reconnects,
            reconnect_attempt,
            history_len: 0,
            rtt_samples,
            p50_rtt_us: p50,
            p99_rtt_us: p99,
        }
    }
}
