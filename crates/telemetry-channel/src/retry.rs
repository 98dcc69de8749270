// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Exponential backoff for retryable transport failures.
//!
//! The delay is a pure function of the consecutive-failure count of a channel:
//!
//! ```text
//! failures:  1     2     3     4     ...
//! delay:     b     2b    4b    8b    ... capped at max
//! ```
//!
//! Jitter adds a random amount in `[0, b/2)` before the cap is applied. Since
//! consecutive uncapped delays differ by at least `b`, the jittered sequence
//! stays non-decreasing, and every delay at the ceiling is exactly `max`.

use std::time::Duration;

/// Multiplier applied per consecutive failure.
const BACKOFF_MULTIPLIER: u32 = 2;

/// Exponent beyond which the delay is guaranteed to sit at the ceiling.
const MAX_EXPONENT: u32 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(20 * 60),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration, jitter: bool) -> Self {
        RetryPolicy {
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter,
        }
    }

    /// Delay to wait before retrying after `consecutive_failures` failures.
    ///
    /// A count of zero means nothing failed yet and yields no delay.
    #[must_use]
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (consecutive_failures - 1).min(MAX_EXPONENT);
        let factor = BACKOFF_MULTIPLIER.saturating_pow(exponent);
        let uncapped = self.base_delay.saturating_mul(factor);

        let jittered = if self.jitter {
            uncapped.saturating_add(self.jitter_amount())
        } else {
            uncapped
        };
        jittered.min(self.max_delay)
    }

    fn jitter_amount(&self) -> Duration {
        let half_base = u64::try_from(self.base_delay.as_millis() / 2).unwrap_or(u64::MAX);
        if half_base == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(fastrand::u64(..half_base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: bool) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(100), Duration::from_secs(2), jitter)
    }

    #[test]
    fn test_no_failures_no_delay() {
        assert_eq!(policy(false).delay(0), Duration::ZERO);
    }

    #[test]
    fn test_delay_doubles_until_ceiling() {
        let policy = policy(false);
        let delays: Vec<u128> = (1..=7).map(|n| policy.delay(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1600, 2000, 2000]);
    }

    #[test]
    fn test_huge_failure_counts_saturate_at_ceiling() {
        let policy = policy(false);
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn test_jittered_delays_are_non_decreasing() {
        let policy = policy(true);
        for _ in 0..200 {
            let delays: Vec<Duration> = (1..=10).map(|n| policy.delay(n)).collect();
            assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]), "{delays:?}");
            assert_eq!(*delays.last().expect("ten delays"), Duration::from_secs(2));
        }
    }

    #[test]
    fn test_jitter_stays_within_half_base() {
        let policy = policy(true);
        for _ in 0..200 {
            let delay = policy.delay(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay < Duration::from_millis(150));
        }
    }

    #[test]
    fn test_max_is_never_below_base() {
        let policy = RetryPolicy::new(Duration::from_secs(5), Duration::from_secs(1), false);
        assert_eq!(policy.delay(1), Duration::from_secs(5));
        assert_eq!(policy.delay(4), Duration::from_secs(5));
    }
}
