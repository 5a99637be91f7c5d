//! Backoff arithmetic for reconnects and pollers.
//!
//! Randomness never originates here: jitter is applied from a caller-supplied
//! unit value so every delay is reproducible in tests.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ceiling for the reconnect delay.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Delay before reconnect attempt number `attempt` (zero-based).
///
/// `min(base × 2^attempt, 30s)`.
pub fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay_ms).min(MAX_RECONNECT_DELAY)
}

/// Backoff and jitter settings for a poller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffPolicy {
    /// Backoff delay with zero failures (milliseconds)
    pub base_ms: u64,
    /// Growth factor per consecutive failure
    pub factor: f64,
    /// Upper bound for the backoff delay (milliseconds)
    pub max_ms: u64,
    /// Symmetric jitter as a fraction of the delay (0.1 = ±10%)
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            factor: 2.0,
            max_ms: 60_000,
            jitter: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// The same policy without jitter.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// `min(base × factor^failures, max)`.
    pub fn backoff_ms(&self, consecutive_failures: u32) -> u64 {
        let exponent = i32::try_from(consecutive_failures).unwrap_or(i32::MAX);
        let raw = self.base_ms as f64 * self.factor.max(1.0).powi(exponent);
        if !raw.is_finite() || raw >= self.max_ms as f64 {
            self.max_ms
        } else {
            raw as u64
        }
    }

    /// Delay before the next tick.
    ///
    /// `unit` is a sample in `[-1.0, 1.0]`; values outside are clamped.
    pub fn next_delay(&self, interval: Duration, consecutive_failures: u32, unit: f64) -> Duration {
        let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        let delay_ms = interval_ms.max(self.backoff_ms(consecutive_failures)) as f64;
        let spread = self.jitter.clamp(0.0, 1.0) * unit.clamp(-1.0, 1.0);
        Duration::from_millis((delay_ms * (1.0 + spread)).round().max(0.0) as u64)
    }
}
