//! Retry policy with capped exponential backoff.
//!
//! The policy is pure: it decides from a record's retry bookkeeping and the
//! current time whether a drain may submit the record again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Failed attempts after which a record is abandoned.
    pub max_retries: u32,
    /// Delay imposed after the first failure.
    pub initial_delay: Duration,
    /// Maximum delay (cap for exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Create a new retry configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }

    /// Set initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculate delay for a given retry count.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Past 64 doublings every sane config is at its cap already.
        let exponent = attempt.min(64) as i32;
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);

        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_delay as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(10)
    }
}

/// Decides when a failed mutation may be submitted again.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Get the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay required after the last attempt before the next one.
    ///
    /// With defaults: `min(1000 * 2^n, 60000)` milliseconds.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        self.config.delay_for_attempt(retry_count)
    }

    /// Whether the record has used up its attempts.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.config.max_retries
    }

    /// Whether a record may be submitted at `now`.
    ///
    /// - Never eligible once exhausted
    /// - Eligible immediately if never attempted
    /// - Otherwise eligible once `backoff(retry_count)` has elapsed since the
    ///   last attempt
    pub fn eligible(
        &self,
        retry_count: u32,
        last_attempt_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        match self.next_attempt_at(retry_count, last_attempt_at) {
            Some(at) => now >= at,
            None => false,
        }
    }

    /// Earliest time the record may be submitted, or `None` if it never will.
    pub fn next_attempt_at(
        &self,
        retry_count: u32,
        last_attempt_at: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        if self.is_exhausted(retry_count) {
            return None;
        }
        let Some(last) = last_attempt_at else {
            return Some(DateTime::<Utc>::MIN_UTC);
        };
        let backoff = chrono::Duration::from_std(self.backoff(retry_count)).ok()?;
        last.checked_add_signed(backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_default_backoff_schedule() {
        let policy = RetryPolicy::default();
        let expected = [1000, 2000, 4000, 8000, 16000, 32000, 60000, 60000];
        for (n, want) in expected.iter().enumerate() {
            assert_eq!(policy.backoff(n as u32), ms(*want), "retry_count {}", n);
        }
    }

    #[test]
    fn test_max_delay_cap() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(10))
            .with_backoff_multiplier(10.0);

        // 1 * 10^5 = 100000 seconds, but should be capped at 10
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(10));
    }

    #[test]
    fn test_never_attempted_is_eligible() {
        let policy = RetryPolicy::default();
        assert!(policy.eligible(0, None, Utc::now()));
    }

    #[test]
    fn test_ineligible_until_backoff_elapses() {
        let policy = RetryPolicy::default();
        let last = Utc::now();

        // One failure recorded: backoff(1) = 2s.
        assert!(!policy.eligible(1, Some(last), last));
        assert!(!policy.eligible(1, Some(last), last + chrono::Duration::milliseconds(1999)));
        assert!(policy.eligible(1, Some(last), last + chrono::Duration::milliseconds(2000)));
    }

    #[test]
    fn test_exhausted_is_never_eligible() {
        let policy = RetryPolicy::default();
        let long_ago = Utc::now() - chrono::Duration::days(365);

        assert!(policy.eligible(9, Some(long_ago), Utc::now()));
        assert!(!policy.eligible(10, Some(long_ago), Utc::now()));
        assert!(!policy.eligible(10, None, Utc::now()));
        assert!(policy.next_attempt_at(11, None).is_none());
    }

    proptest! {
        #[test]
        fn prop_backoff_non_decreasing_and_capped(n in 0u32..10_000) {
            let policy = RetryPolicy::default();
            prop_assert!(policy.backoff(n) <= policy.backoff(n + 1));
            prop_assert!(policy.backoff(n) <= ms(60_000));
            if n >= 6 {
                prop_assert_eq!(policy.backoff(n), ms(60_000));
            }
        }
    }
}
