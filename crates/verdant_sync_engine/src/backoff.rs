//! Backoff between failed rounds.

use crate::config::RetryConfig;
use std::time::Duration;

/// Tracks consecutive round failures and the delay before the next attempt.
///
/// The delay grows per [`RetryConfig::delay_for_attempt`] and is capped at
/// `max_delay`. Any successful round resets it.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    failures: u32,
}

impl Backoff {
    /// Creates a backoff with no recorded failures.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Records a failed round and returns how long to wait before retrying.
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.config.delay_for_attempt(self.failures)
    }

    /// Resets after a successful round.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Returns the number of consecutive failures.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Returns the delay owed for the current failure streak, `None` when
    /// the last round succeeded.
    pub fn pending_delay(&self) -> Option<Duration> {
        (self.failures > 0).then(|| self.config.delay_for_attempt(self.failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RetryConfig {
        RetryConfig::new(3)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350))
            .with_jitter(false)
    }

    #[test]
    fn grows_then_caps() {
        let mut backoff = Backoff::new(config());
        assert_eq!(backoff.pending_delay(), None);

        assert_eq!(backoff.record_failure(), Duration::from_millis(100));
        assert_eq!(backoff.record_failure(), Duration::from_millis(200));
        assert_eq!(backoff.record_failure(), Duration::from_millis(350));
        assert_eq!(backoff.record_failure(), Duration::from_millis(350));
        assert_eq!(backoff.failures(), 4);
        assert_eq!(backoff.pending_delay(), Some(Duration::from_millis(350)));
    }

    #[test]
    fn reset_after_success() {
        let mut backoff = Backoff::new(config());
        backoff.record_failure();
        backoff.record_failure();
        backoff.reset();

        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.record_failure(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_under_cap() {
        let mut backoff = Backoff::new(config().with_jitter(true));
        for _ in 0..50 {
            assert!(backoff.record_failure() <= Duration::from_millis(350));
        }
    }
}
