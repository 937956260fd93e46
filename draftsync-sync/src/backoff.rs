//! Exponential backoff with jitter for outbox retries.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry delay schedule: `base * multiplier^attempt`, capped, plus jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry (ms).
    pub base_ms: u64,
    pub multiplier: u32,
    /// Cap applied before jitter (ms).
    pub max_delay_ms: u64,
    /// Uniform jitter added on top, in `[0, jitter_ms)`.
    pub jitter_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 250,
            multiplier: 2,
            max_delay_ms: 8_000,
            jitter_ms: 200,
        }
    }
}

impl BackoffPolicy {
    /// A policy without jitter, for deterministic schedules.
    pub fn fixed(base_ms: u64) -> Self {
        Self {
            base_ms,
            jitter_ms: 0,
            ..Self::default()
        }
    }

    /// Delay for a zero-based attempt index, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.multiplier).saturating_pow(attempt);
        let ms = self.base_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Delay for a zero-based attempt index, with jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..self.jitter_ms)
        };
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }

    /// Upper bound of `delay(attempt)`.
    pub fn max_delay(&self, attempt: u32) -> Duration {
        self.base_delay(attempt) + Duration::from_millis(self.jitter_ms)
    }
}
