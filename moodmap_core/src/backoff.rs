//! Exponential backoff for producer restarts.
//!
//! Delays grow by `multiplier` per consecutive failure, are capped at
//! `max_delay_ms`, and optionally stretched by up to 25% jitter so many
//! clients reconnecting at once do not land in lockstep.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry (default: 500 ms)
    pub initial_delay_ms: u64,
    /// Upper bound before jitter (default: 30 s)
    pub max_delay_ms: u64,
    /// Growth per consecutive failure (default: 2.0)
    pub multiplier: f64,
    /// Add up to 25% random jitter
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (1-based; 0 means no wait).
    ///
    /// `unit` is a uniform sample in `[0, 1)` used for jitter; callers pass
    /// the context's RNG so simulated runs stay reproducible.
    pub fn delay_for_attempt(&self, attempt: u32, unit: f64) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_ms = self.initial_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped_ms = base_ms.min(self.max_delay_ms as f64);

        let final_ms = if self.jitter {
            capped_ms * (1.0 + unit.clamp(0.0, 1.0) * 0.25)
        } else {
            capped_ms
        };

        Duration::from_secs_f64(final_ms.max(0.0) / 1000.0)
    }
}

/// Consecutive-failure counter driving [`BackoffConfig::delay_for_attempt`].
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Records a failure and returns how long to wait before retrying.
    pub fn next_delay(&mut self, unit: f64) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.config.delay_for_attempt(self.attempt, unit)
    }

    /// Called after a successful (re)subscription.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            jitter: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let config = no_jitter();
        assert_eq!(config.delay_for_attempt(0, 0.0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1, 0.0), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(2, 0.0), Duration::from_millis(1_000));
        assert_eq!(config.delay_for_attempt(3, 0.0), Duration::from_millis(2_000));
    }

    #[test]
    fn test_delay_is_capped() {
        let config = no_jitter();
        assert_eq!(config.delay_for_attempt(10, 0.0), Duration::from_secs(30));
        assert_eq!(config.delay_for_attempt(u32::MAX, 0.0), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let config = BackoffConfig::default();
        let low = config.delay_for_attempt(1, 0.0);
        let high = config.delay_for_attempt(1, 0.999);
        assert_eq!(low, Duration::from_millis(500));
        assert!(high > low);
        assert!(high <= Duration::from_millis(625));
    }

    #[test]
    fn test_backoff_resets() {
        let mut backoff = Backoff::new(no_jitter());
        assert_eq!(backoff.next_delay(0.0), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(0.0), Duration::from_millis(1_000));
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(0.0), Duration::from_millis(500));
    }
}
