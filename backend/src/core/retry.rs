//! Bounded retry with exponential backoff for external collaborators.
//!
//! Backoff sleeps go through the [`WallClock`], so tests retry instantly on a
//! `ManualClock`.

use crate::config::RetryConfig;
use crate::core::time::WallClock;
use chrono::Duration;
use std::fmt::Display;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            multiplier,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::milliseconds(config.initial_backoff_ms as i64),
            config.multiplier,
        )
    }

    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self::new(1, Duration::zero(), 1.0)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff before attempt `attempt + 1` (`attempt` counts from 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::milliseconds((self.initial_backoff.num_milliseconds() as f64 * factor).round() as i64)
    }

    /// Run `op` until it succeeds or the attempt cap is reached; the last
    /// error is returned on exhaustion.
    pub fn run<T, E: Display>(
        &self,
        op_name: &str,
        clock: &mut dyn WallClock,
        mut op: impl FnMut() -> Result<T, E>,
    ) -> Result<T, E> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.max_attempts => return Err(err),
                Err(err) => {
                    let backoff = self.backoff(attempt);
                    warn!(
                        op = op_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = backoff.num_milliseconds(),
                        error = %err,
                        "Attempt failed, retrying"
                    );
                    clock.sleep(backoff);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::ManualClock;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = RetryPolicy::new(5, Duration::milliseconds(100), 2.0);
        assert_eq!(policy.backoff(1), Duration::milliseconds(100));
        assert_eq!(policy.backoff(2), Duration::milliseconds(200));
        assert_eq!(policy.backoff(4), Duration::milliseconds(800));
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let mut clock = ManualClock::new(start);
        let policy = RetryPolicy::new(5, Duration::seconds(1), 2.0);

        let mut calls = 0;
        let result: Result<u32, String> = policy.run("flaky", &mut clock, || {
            calls += 1;
            if calls < 3 {
                Err(format!("failure {}", calls))
            } else {
                Ok(calls)
            }
        });

        assert_eq!(result, Ok(3));
        assert_eq!(clock.now(), start + Duration::seconds(3), "slept 1s then 2s");
    }

    #[test]
    fn test_gives_up_at_attempt_cap() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let mut clock = ManualClock::new(start);
        let policy = RetryPolicy::new(3, Duration::seconds(1), 1.0);

        let mut calls = 0;
        let result: Result<(), String> = policy.run("broken", &mut clock, || {
            calls += 1;
            Err(format!("failure {}", calls))
        });

        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls, 3);
    }
}
