/*!
 * Exponential backoff shared by the LLM and Robaws clients.
 */

use std::time::Duration;

/// Upper bound for a single wait
const MAX_BACKOFF_MS: u64 = 60_000;

/// Delay before retry number `attempt` (1-based)
///
/// `base_ms * 2^(attempt-1)` plus up to 10% random jitter, so workers that
/// failed together do not retry in lockstep.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay_ms = base_ms.saturating_mul(1u64 << exponent).min(MAX_BACKOFF_MS);
    let jitter_ms = if delay_ms >= 10 {
        rand::random_range(0..=delay_ms / 10)
    } else {
        0
    };
    Duration::from_millis(delay_ms + jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoffDelay_shouldDoubleWithJitter() {
        for (attempt, base) in [(1, 100), (2, 200), (3, 400)] {
            let delay = backoff_delay(100, attempt).as_millis() as u64;
            assert!(delay >= base && delay <= base + base / 10, "attempt {}: {}", attempt, delay);
        }
    }

    #[test]
    fn test_backoffDelay_shouldCap() {
        assert!(backoff_delay(1000, 30) <= Duration::from_millis(MAX_BACKOFF_MS + MAX_BACKOFF_MS / 10));
        assert_eq!(backoff_delay(0, 3), Duration::ZERO);
    }
}
