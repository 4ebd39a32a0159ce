//! Jittered exponential backoff for firehose reconnects.

use std::time::Duration;

/// Reconnect backoff policy: exponential growth capped at `max_delay`,
/// jittered deterministically so repeated calls with the same attempt
/// number do not always produce the same delay.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            max_attempts: None,
        }
    }
}

/// Cheap deterministic pseudo-random fraction in `[0.0, 1.0)`, derived
/// from the attempt number. Avoids pulling in a full RNG crate for one
/// jitter value.
fn pseudo_random_fraction(seed: u32) -> f64 {
    let mut x = seed.wrapping_mul(2654435761).wrapping_add(1);
    x ^= x >> 15;
    x = x.wrapping_mul(2246822519);
    x ^= x >> 13;
    (x % 10_000) as f64 / 10_000.0
}

impl ReconnectPolicy {
    /// Delay before the given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = 0.8 + pseudo_random_fraction(attempt) * 0.4; // +/-20%
        Duration::from_secs_f64((capped * jitter).max(0.0))
    }

    pub fn should_give_up(&self, attempt: u32) -> bool {
        matches!(self.max_attempts, Some(max) if attempt >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let p = ReconnectPolicy::default();
        assert_eq!(p.initial_delay, Duration::from_millis(500));
        assert_eq!(p.max_delay, Duration::from_secs(60));
        assert!(p.max_attempts.is_none());
    }

    #[test]
    fn delay_grows_with_attempt() {
        let p = ReconnectPolicy::default();
        let d0 = p.delay_for_attempt(0);
        let d3 = p.delay_for_attempt(3);
        assert!(d3 > d0);
    }

    #[test]
    fn delay_is_capped() {
        let p = ReconnectPolicy::default();
        let d = p.delay_for_attempt(30);
        assert!(d <= p.max_delay + Duration::from_secs(1));
    }

    #[test]
    fn unlimited_attempts_never_gives_up() {
        let p = ReconnectPolicy::default();
        assert!(!p.should_give_up(10_000));
    }

    #[test]
    fn give_up_threshold_respected() {
        let mut p = ReconnectPolicy::default();
        p.max_attempts = Some(5);
        assert!(!p.should_give_up(4));
        assert!(p.should_give_up(5));
    }
}
