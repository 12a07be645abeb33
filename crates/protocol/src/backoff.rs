//! Shared retry pacing for drain passes and transfer retries.

use std::time::Duration;

/// Capped exponential backoff.
///
/// Both the queue drainer and transfer sessions pace their retries with
/// this policy. Unbounded retry is never allowed; callers pair the delay
/// curve with [`Backoff::max_attempts`].
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the delay between attempts.
    pub max_delay: Duration,
    /// Multiplier applied for each subsequent attempt.
    pub factor: f64,
    /// Attempts after which the operation is surfaced as failed.
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
            max_attempts: 10,
        }
    }
}

impl Backoff {
    /// Delay for a given attempt number (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.factor.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Returns `true` once `attempt` has used up the retry budget.
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_geometrically_and_cap() {
        let b = Backoff::default();
        assert_eq!(b.delay_for_attempt(1), Duration::from_millis(250));
        assert_eq!(b.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(b.delay_for_attempt(3), Duration::from_secs(1));
        // Attempt 9 would be 64s uncapped; the cap holds it at 30s.
        assert_eq!(b.delay_for_attempt(9), Duration::from_secs(30));
        assert_eq!(b.delay_for_attempt(60), Duration::from_secs(30));
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let b = Backoff::default();
        assert_eq!(b.delay_for_attempt(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn budget_exhaustion() {
        let b = Backoff {
            max_attempts: 3,
            ..Backoff::default()
        };
        assert!(!b.exhausted(2));
        assert!(b.exhausted(3));
        assert!(b.exhausted(4));
    }
}
