use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Full-jitter exponential backoff: a uniform draw from zero up to the
    /// capped exponential ceiling for this attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling_ms = self.ceiling_ms(attempt);
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        let jittered = (ceiling_ms as f64 * rand::random::<f64>()) as u64;
        Duration::from_millis(jittered)
    }

    fn ceiling_ms(&self, attempt: u32) -> u64 {
        let shift = attempt.min(62);
        let factor = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }
}

#[cfg(not(test))]
pub(crate) async fn sleep_backoff(policy: &RetryPolicy, attempt: u32) {
    tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
}

#[cfg(test)]
pub(crate) async fn sleep_backoff(_policy: &RetryPolicy, _attempt: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_doubles_per_attempt_until_the_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.ceiling_ms(0), 200);
        assert_eq!(policy.ceiling_ms(1), 400);
        assert_eq!(policy.ceiling_ms(2), 800);
        assert_eq!(policy.ceiling_ms(10), 5_000);
    }

    #[test]
    fn jittered_delay_stays_within_the_ceiling() {
        let policy = RetryPolicy::default();
        for attempt in 0..5 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay.as_millis() as u64 <= policy.ceiling_ms(attempt));
        }
    }

    #[test]
    fn zero_base_yields_zero_delay() {
        let policy = RetryPolicy {
            base_delay_ms: 0,
            max_delay_ms: 5_000,
        };
        assert_eq!(policy.delay_for_attempt(3), Duration::ZERO);
    }
}
