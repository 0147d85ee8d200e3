//! Retry delay policy for re-queued requests

use chrono::Duration;

use crate::config::BackoffConfig;

/// Exponential backoff: `base * 2^retries`, capped at `max`, optionally
/// spread by a random factor in `[1 - jitter, 1 + jitter]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    base_secs: u64,
    max_secs: u64,
    jitter_ratio: f64,
}

impl BackoffPolicy {
    pub fn new(base_secs: u64, max_secs: u64, jitter_ratio: f64) -> Self {
        Self {
            base_secs,
            max_secs: max_secs.max(base_secs),
            jitter_ratio: jitter_ratio.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            config.base_delay_secs,
            config.max_delay_secs,
            config.jitter_ratio,
        )
    }

    /// Deterministic delay after `retries` earlier failures
    pub fn base_delay(&self, retries: u32) -> Duration {
        let factor = 1u64.checked_shl(retries).unwrap_or(u64::MAX);
        let secs = self.base_secs.saturating_mul(factor).min(self.max_secs);
        Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
    }

    /// Delay with jitter applied, never above the cap
    pub fn delay(&self, retries: u32) -> Duration {
        let base = self.base_delay(retries);
        if self.jitter_ratio == 0.0 {
            return base;
        }

        let spread = 1.0 + self.jitter_ratio * (2.0 * fastrand::f64() - 1.0);
        let millis = (base.num_milliseconds() as f64 * spread).round() as i64;
        let cap_millis = i64::try_from(self.max_secs)
            .unwrap_or(i64::MAX / 1000)
            .saturating_mul(1000);
        Duration::milliseconds(millis.clamp(0, cap_millis))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}
