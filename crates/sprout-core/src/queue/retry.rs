//! Retry policy: decides backoff delays.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for a single backoff delay.
const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Backoff attached to every task record.
///
/// `delay = base × multiplier^(attempts − 1)`; a multiplier of 1.0 gives a
/// fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Base delay for the first retry, in milliseconds.
    pub base_ms: u64,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// 2s base, doubling: 2s, 4s, 8s, ...
    fn default() -> Self {
        Self::exponential_ms(2000)
    }
}

impl RetryPolicy {
    pub fn exponential_ms(base_ms: u64) -> Self {
        Self {
            base_ms,
            multiplier: 2.0,
        }
    }

    pub fn fixed_ms(delay_ms: u64) -> Self {
        Self {
            base_ms: delay_ms,
            multiplier: 1.0,
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    /// Delay before the next attempt.
    ///
    /// `attempts` is the number of attempts already made (1-indexed):
    /// with base=2s and multiplier=2.0, attempt 1 fails -> 2s, attempt 2 -> 4s,
    /// attempt 3 -> 8s. Capped at one day.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(63) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = self.base_delay().as_secs_f64() * factor;
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_DELAY)
            .min(MAX_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_policy_is_two_second_exponential() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay(), Duration::from_secs(2));
        assert_eq!(policy.multiplier, 2.0);
    }

    #[rstest]
    #[case::first(1, 2)]
    #[case::second(2, 4)]
    #[case::third(3, 8)]
    #[case::zero_uses_base(0, 2)]
    fn exponential_backoff_doubles(#[case] attempts: u32, #[case] secs: u64) {
        assert_eq!(
            RetryPolicy::default().next_delay(attempts),
            Duration::from_secs(secs)
        );
    }

    #[test]
    fn fixed_policy_never_grows() {
        let policy = RetryPolicy::fixed_ms(500);
        assert_eq!(policy.next_delay(1), policy.next_delay(7));
    }

    #[test]
    fn huge_attempt_counts_are_capped() {
        assert_eq!(RetryPolicy::default().next_delay(u32::MAX), MAX_DELAY);
    }
}
