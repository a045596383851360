//! Exponential backoff

use std::time::Duration;

/// Delay before the next attempt after `consecutive_errors` failures in a row
///
/// `base * 2^(consecutive_errors - 1)`, capped at `max`. Zero errors yields
/// `base`, which is also where the sequence restarts after a success.
pub fn backoff_delay(consecutive_errors: u32, base: Duration, max: Duration) -> Duration {
    let exponent = consecutive_errors.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(max, |delay| delay.min(max))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(300);
    const MAX: Duration = Duration::from_secs(3600);

    #[test]
    fn test_documented_sequence() {
        let delays: Vec<u64> = (1..=5)
            .map(|k| backoff_delay(k, BASE, MAX).as_secs())
            .collect();
        assert_eq!(delays, vec![300, 600, 1200, 2400, 3600]);
    }

    #[test]
    fn test_monotonic_up_to_cap() {
        let mut previous = Duration::ZERO;
        for k in 1..100 {
            let delay = backoff_delay(k, BASE, MAX);
            assert!(delay >= previous);
            assert!(delay <= MAX);
            previous = delay;
        }
        assert_eq!(previous, MAX);
    }

    #[test]
    fn test_resets_to_base() {
        assert_eq!(backoff_delay(0, BASE, MAX), BASE);
        assert_eq!(backoff_delay(1, BASE, MAX), BASE);
    }

    #[test]
    fn test_huge_counts_saturate() {
        assert_eq!(backoff_delay(u32::MAX, Duration::from_secs(u64::MAX / 2), MAX), MAX);
    }
}
