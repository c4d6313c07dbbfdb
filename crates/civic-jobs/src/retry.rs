//! Backoff policies applied between a failed attempt and the next retry.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Same delay before every retry.
    Fixed,
    /// Delay grows with the number of failed attempts.
    Exponential,
}

/// Backoff policy, serialized as `{"type": "fixed" | "exponential", "delay": <ms>}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Backoff strategy.
    #[serde(rename = "type")]
    pub kind: BackoffKind,

    /// Base delay in milliseconds.
    #[serde(rename = "delay")]
    pub delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(1000)
    }
}

impl BackoffPolicy {
    /// Creates a fixed delay policy.
    pub fn fixed(delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            delay_ms,
        }
    }

    /// Creates an exponential backoff policy.
    pub fn exponential(delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            delay_ms,
        }
    }

    /// Delay to wait after `attempts_made` failed attempts.
    ///
    /// Fixed: `delay`. Exponential: `(2^attempts_made - 1) * delay`, so the
    /// first retry waits `delay`, the second `3 * delay`, the third `7 * delay`.
    pub fn delay_for_attempt(&self, attempts_made: u32) -> Duration {
        if attempts_made == 0 {
            return Duration::ZERO;
        }

        let millis = match self.kind {
            BackoffKind::Fixed => self.delay_ms,
            BackoffKind::Exponential => {
                let factor = 1u64
                    .checked_shl(attempts_made)
                    .map_or(u64::MAX, |pow| pow - 1);
                factor.saturating_mul(self.delay_ms)
            }
        };

        Duration::from_millis(millis)
    }

    /// Same as [`delay_for_attempt`](Self::delay_for_attempt), capped at `max`.
    pub fn capped_delay(&self, attempts_made: u32, max: Duration) -> Duration {
        self.delay_for_attempt(attempts_made).min(max)
    }
}
