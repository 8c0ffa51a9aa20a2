//! Restart backoff for failed workers

use crate::config::SupervisorConfig;
use std::time::Duration;

/// Exponential restart delay: `min(base * multiplier^restarts, max)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartBackoff {
    base: Duration,
    multiplier: f64,
    max: Duration,
}

impl RestartBackoff {
    pub fn new(base: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            base,
            multiplier: multiplier.max(1.0),
            max,
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(
            config.restart_base_delay(),
            config.restart_multiplier,
            config.max_restart_delay(),
        )
    }

    /// Delay before the restart that follows `restart_count` earlier restarts
    pub fn delay(&self, restart_count: u32) -> Duration {
        let exponent = restart_count.min(i32::MAX as u32) as i32;
        let secs = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max.as_secs_f64());
        if capped.is_finite() {
            Duration::from_secs_f64(capped.max(0.0))
        } else {
            self.max
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sequence() {
        let backoff = RestartBackoff::new(Duration::from_secs(30), 2.0, Duration::from_secs(600));
        assert_eq!(backoff.delay(0), Duration::from_secs(30));
        assert_eq!(backoff.delay(1), Duration::from_secs(60));
        assert_eq!(backoff.delay(4), Duration::from_secs(480));
        assert_eq!(backoff.delay(5), Duration::from_secs(600));
        assert_eq!(backoff.delay(1_000), Duration::from_secs(600));
    }

    #[test]
    fn test_monotone_and_capped() {
        for multiplier in [1.0, 1.5, 2.0, 3.0] {
            let max = Duration::from_secs(600);
            let backoff = RestartBackoff::new(Duration::from_secs(7), multiplier, max);
            let mut previous = Duration::ZERO;
            for count in 0..200 {
                let delay = backoff.delay(count);
                assert!(delay >= previous);
                assert!(delay <= max);
                previous = delay;
            }
        }
    }

    #[test]
    fn test_multiplier_below_one_is_clamped() {
        let backoff = RestartBackoff::new(Duration::from_secs(10), 0.5, Duration::from_secs(60));
        assert_eq!(backoff.delay(3), Duration::from_secs(10));
    }
}
