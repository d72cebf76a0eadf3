use crate::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential reconnect backoff with an upper cap and jitter.
///
/// `delay(n) = min(max, base * 2^(n-1) + jitter)` where jitter is uniform in
/// `[0, ratio * base * 2^(n-1)]`. With `ratio <= 1` the sequence never decreases.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: f64, max_attempts: u32) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: if jitter.is_finite() { jitter.clamp(0.0, 1.0) } else { 0.0 },
            max_attempts,
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.base, config.max, config.jitter, config.max_attempts)
    }

    /// Delay before reconnect attempt `attempt` (1-based), with random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let unit: f64 = rand::thread_rng().gen();
        self.delay_with(attempt, unit)
    }

    /// Delay for `attempt` with the jitter fraction fixed to `unit` (0.0-1.0).
    pub fn delay_with(&self, attempt: u32, unit: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let raw = self
            .base
            .checked_mul(1u32 << exponent)
            .unwrap_or(Duration::MAX);

        if raw >= self.max {
            return self.max;
        }

        let jitter = raw.mul_f64(self.jitter * unit.clamp(0.0, 1.0));
        raw.saturating_add(jitter).min(self.max)
    }

    /// Whether `attempt` is past the retry budget.
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}
