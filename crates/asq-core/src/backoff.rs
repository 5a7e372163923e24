use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Growth factor used when a task does not override it.
pub const DEFAULT_FACTOR: f64 = 2.0;

/// Upper bound on a single retry delay (one day).
pub const MAX_DELAY_SECS: u64 = 24 * 60 * 60;

/// Exponential retry policy carried with a task across broker round trips.
///
/// Each call to [`Backoff::next_attempt`] returns `delay * factor^(attempts + 1)` in whole
/// seconds and advances the attempt counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    #[serde(default)]
    attempts: u32,
    #[serde(default = "default_factor")]
    factor: f64,
    #[serde(default)]
    delay_ms: u64,
}

fn default_factor() -> f64 {
    DEFAULT_FACTOR
}

impl Backoff {
    pub fn new(delay: Duration, factor: f64) -> Self {
        Backoff {
            attempts: 0,
            factor,
            delay_ms: delay.as_millis() as u64,
        }
    }

    /// Number of retries already scheduled through this policy.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn next_attempt(&mut self) -> Duration {
        let next = self.delay_for(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        next
    }

    fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_add(1).min(i32::MAX as u32) as i32;
        let secs = (self.delay_ms as f64 / 1000.0) * self.factor.powi(exponent);
        let secs = if secs.is_finite() && secs > 0.0 {
            (secs.trunc() as u64).min(MAX_DELAY_SECS)
        } else if secs.is_infinite() && secs > 0.0 {
            MAX_DELAY_SECS
        } else {
            0
        };
        self.jitter(Duration::from_secs(secs))
    }

    // Hook for randomized spreading of retries; currently the identity.
    fn jitter(&self, delay: Duration) -> Duration {
        delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(Duration::from_secs(1), DEFAULT_FACTOR)
    }
}
