use std::time::Duration;

use rand::Rng;

/// Exponential restart backoff with additive jitter.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// `min(base * 2^attempt, max)`, saturating for large attempts.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Base delay plus up to 10% of it. Jitter is only ever added.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for(attempt);
        let jitter_limit_ms = u64::try_from(delay.as_millis() / 10).unwrap_or(u64::MAX);
        if jitter_limit_ms == 0 {
            return delay;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=jitter_limit_ms);
        delay + Duration::from_millis(jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(1000), Duration::from_millis(30_000))
    }

    #[test]
    fn test_base_delay_doubles() {
        let p = policy();
        assert_eq!(p.base_delay_for(0), Duration::from_millis(1000));
        assert_eq!(p.base_delay_for(1), Duration::from_millis(2000));
        assert_eq!(p.base_delay_for(2), Duration::from_millis(4000));
    }

    #[test]
    fn test_base_delay_caps_at_max() {
        let p = policy();
        assert_eq!(p.base_delay_for(5), Duration::from_millis(30_000));
        assert_eq!(p.base_delay_for(40), Duration::from_millis(30_000));
    }

    #[test]
    fn test_jitter_bounds() {
        let p = policy();
        for attempt in 0..6 {
            let base = p.base_delay_for(attempt);
            for _ in 0..200 {
                let delay = p.delay_for(attempt);
                assert!(delay >= base);
                assert!(delay <= base + base / 10);
            }
        }
    }

    #[test]
    fn test_tiny_delays_have_no_jitter() {
        let p = BackoffPolicy::new(Duration::from_millis(5), Duration::from_millis(5));
        assert_eq!(p.delay_for(3), Duration::from_millis(5));
    }
}
