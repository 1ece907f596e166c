//! Exponential requeue delays.

use std::time::Duration;

/// `delay(n) = min(base * 2^(n-1), max)` for the n-th consecutive failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(300),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Delay before the retry that follows `failures` consecutive failures
    pub fn delay(&self, failures: u32) -> Duration {
        if failures <= 1 {
            return self.base.min(self.max);
        }
        let exponent = (failures - 1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Interval used for failures that retrying will not fix soon
    pub fn capped(&self) -> Duration {
        self.max
    }
}
