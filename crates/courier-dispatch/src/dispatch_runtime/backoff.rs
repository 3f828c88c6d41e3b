//! Backoff policy math for per-job retry waits.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `BackoffPolicy` values.
pub enum BackoffPolicy {
    Fixed,
    Linear,
    Exponential,
}

/// Delay before the attempt following failed attempt `attempt` (1-based).
///
/// Exponential growth is capped at 2^10 so the shift cannot overflow and the
/// wait stays bounded for long-running unbounded jobs.
pub fn retry_delay_ms(policy: BackoffPolicy, base_delay_ms: u64, attempt: usize) -> u64 {
    if base_delay_ms == 0 {
        return 0;
    }
    let attempt = attempt.max(1);
    match policy {
        BackoffPolicy::Fixed => base_delay_ms,
        BackoffPolicy::Linear => base_delay_ms.saturating_mul(attempt as u64),
        BackoffPolicy::Exponential => {
            let exponent = attempt.saturating_sub(1).min(10) as u32;
            base_delay_ms.saturating_mul(1_u64 << exponent)
        }
    }
}

pub async fn apply_retry_delay(policy: BackoffPolicy, base_delay_ms: u64, attempt: usize) {
    let delay_ms = retry_delay_ms(policy, base_delay_ms, attempt);
    if delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::{retry_delay_ms, BackoffPolicy};

    #[test]
    fn fixed_policy_is_constant() {
        assert_eq!(retry_delay_ms(BackoffPolicy::Fixed, 900, 1), 900);
        assert_eq!(retry_delay_ms(BackoffPolicy::Fixed, 900, 7), 900);
    }

    #[test]
    fn linear_policy_scales_with_attempt() {
        assert_eq!(retry_delay_ms(BackoffPolicy::Linear, 100, 1), 100);
        assert_eq!(retry_delay_ms(BackoffPolicy::Linear, 100, 3), 300);
    }

    #[test]
    fn exponential_policy_doubles_and_caps() {
        assert_eq!(retry_delay_ms(BackoffPolicy::Exponential, 100, 1), 100);
        assert_eq!(retry_delay_ms(BackoffPolicy::Exponential, 100, 2), 200);
        assert_eq!(retry_delay_ms(BackoffPolicy::Exponential, 100, 4), 800);
        assert_eq!(
            retry_delay_ms(BackoffPolicy::Exponential, 100, 40),
            100 * 1_024
        );
    }

    #[test]
    fn delays_are_monotonic_per_policy() {
        for policy in [
            BackoffPolicy::Fixed,
            BackoffPolicy::Linear,
            BackoffPolicy::Exponential,
        ] {
            let mut previous = 0;
            for attempt in 1..=8 {
                let delay = retry_delay_ms(policy, 50, attempt);
                assert!(delay >= previous, "{policy:?} attempt {attempt}");
                previous = delay;
            }
        }
    }

    #[test]
    fn zero_base_disables_waiting() {
        assert_eq!(retry_delay_ms(BackoffPolicy::Exponential, 0, 5), 0);
    }
}
