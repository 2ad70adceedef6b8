//! Retry scheduling: exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Decides whether a failed job is rescheduled, and when.
///
/// Delays grow as `base_delay * 2^(attempt - 1)`, capped at `max_delay`,
/// with a random additive jitter so a burst of failures does not reclaim in
/// lockstep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling applied before jitter.
    pub max_delay: Duration,
    /// Jitter fraction in 0.0..=1.0, applied as `delay * [0, jitter)`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(900),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: 0.1,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// True while the job has retry budget left.
    ///
    /// `retry_count` counts retries already scheduled; a job is retried
    /// while the next attempt number stays below `max_retries`, so a budget
    /// of N allows N total failed attempts before dead-lettering.
    pub fn should_retry(&self, retry_count: u32, max_retries: u32) -> bool {
        retry_count + 1 < max_retries
    }

    /// Delay before retry `attempt` (1-based), jitter included.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exp = 2_f64.powi((attempt - 1).min(30) as i32);
        let delay_ms = (base_ms * exp).min(max_ms);

        let jitter_range = delay_ms * self.jitter;
        let jitter_ms = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(0.0..jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter_ms) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_up_to_the_cap() {
        let policy = RetryPolicy::new(Duration::from_secs(10), Duration::from_secs(60))
            .with_jitter(0.0);

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(20));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(40));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(60));
    }

    #[test]
    fn successive_delays_are_non_decreasing_below_the_cap() {
        let policy = RetryPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 1..=5 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= previous, "attempt {attempt} shrank the delay");
            previous = delay;
        }
    }

    #[test]
    fn jitter_stays_within_its_fraction() {
        let policy =
            RetryPolicy::new(Duration::from_secs(100), Duration::from_secs(1000)).with_jitter(0.1);

        for _ in 0..50 {
            let delay = policy.delay_for_attempt(1);
            assert!(delay >= Duration::from_secs(100));
            assert!(delay < Duration::from_secs(110));
        }
    }

    #[test]
    fn retry_budget_counts_total_failed_attempts() {
        let policy = RetryPolicy::default();

        // max_retries = 2: first failure retries, second dead-letters.
        assert!(policy.should_retry(0, 2));
        assert!(!policy.should_retry(1, 2));

        // max_retries = 0: straight to the DLQ.
        assert!(!policy.should_retry(0, 0));
    }

    #[test]
    fn zero_attempt_has_no_delay() {
        assert_eq!(
            RetryPolicy::default().delay_for_attempt(0),
            Duration::ZERO
        );
    }

    #[test]
    fn huge_attempt_numbers_stay_capped() {
        let policy = RetryPolicy::default().with_jitter(0.0);
        assert_eq!(policy.delay_for_attempt(1000), policy.max_delay);
    }
}
