// src/rpc/backoff.rs

//! Capped exponential backoff curves.

use std::time::Duration;

/// Maps a retry index to a wait duration: `round(base * factor^index)`,
/// never more than `max`. Monotonic for `factor >= 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    base: Duration,
    factor: f64,
    max: Duration,
}

impl ExponentialBackoff {
    /// Curve used between retries of an RPC call.
    pub const DEFAULT: ExponentialBackoff = ExponentialBackoff::new(
        Duration::from_millis(300),
        1.15,
        Duration::from_millis(5000),
    );

    /// Steeper curve used between status polls.
    pub const POLLING: ExponentialBackoff = ExponentialBackoff::new(
        Duration::from_millis(300),
        1.4,
        Duration::from_millis(5000),
    );

    pub const fn new(base: Duration, factor: f64, max: Duration) -> Self {
        Self { base, factor, max }
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn delay(&self, index: u32) -> Duration {
        let max_ms = self.max.as_millis() as f64;
        let exponent = i32::try_from(index).unwrap_or(i32::MAX);
        let ms = (self.base.as_millis() as f64 * self.factor.powi(exponent)).round();
        // NaN/inf from extreme exponents fall back to the cap.
        let ms = if ms.is_finite() { ms.min(max_ms) } else { max_ms };
        Duration::from_millis(ms as u64)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::DEFAULT
    }
}
