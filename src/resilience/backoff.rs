//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Calculate exponential backoff delay with jitter.
///
/// `attempt` is the number of the failed attempt (1-based): attempt 1 waits
/// `base_ms`, attempt 2 waits `base_ms * multiplier`, and so on up to `max_ms`.
pub fn calculate_backoff(attempt: u32, base_ms: u64, multiplier: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let growth = multiplier.max(1).saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(growth);
    let capped_delay = delay_ms.min(max_ms);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}
