use std::time::Duration;

use super::types::ReconnectStrategy;

/// Linear back-off: the Nth retry waits `base × N`.
///
/// Growth is linear, not exponential, and there is no cap other than `max_attempts`; once the
/// budget is spent `next_delay` returns `None` until `reset`.
#[derive(Clone, Debug)]
pub struct LinearBackoffReconnect {
    base: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl LinearBackoffReconnect {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            attempts: 0,
        }
    }
}

impl Default for LinearBackoffReconnect {
    fn default() -> Self {
        Self::new(Duration::from_millis(5_000), 10)
    }
}

impl ReconnectStrategy for LinearBackoffReconnect {
    fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.base.saturating_mul(self.attempts))
    }

    fn attempts(&self) -> u32 {
        self.attempts
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_linearly_until_exhausted() {
        let mut strategy = LinearBackoffReconnect::new(Duration::from_millis(3_000), 3);

        assert_eq!(strategy.next_delay(), Some(Duration::from_millis(3_000)));
        assert_eq!(strategy.next_delay(), Some(Duration::from_millis(6_000)));
        assert_eq!(strategy.next_delay(), Some(Duration::from_millis(9_000)));
        assert_eq!(strategy.attempts(), 3);

        assert_eq!(strategy.next_delay(), None);
        assert_eq!(strategy.attempts(), 3, "exhaustion does not advance the counter");
    }

    #[test]
    fn reset_restarts_the_schedule() {
        let mut strategy = LinearBackoffReconnect::new(Duration::from_millis(100), 2);
        strategy.next_delay();
        strategy.next_delay();
        assert_eq!(strategy.next_delay(), None);

        strategy.reset();
        assert_eq!(strategy.attempts(), 0);
        assert_eq!(strategy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn zero_budget_never_retries() {
        let mut strategy = LinearBackoffReconnect::new(Duration::from_secs(1), 0);
        assert_eq!(strategy.next_delay(), None);
        assert_eq!(strategy.max_attempts(), 0);
    }
}
