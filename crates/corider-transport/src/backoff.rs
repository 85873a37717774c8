//! Exponential backoff with full jitter

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capped exponential backoff.
///
/// The delay before retry `attempt` (zero-based) is drawn uniformly from
/// `[0, min(cap, base * 2^attempt)]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Base delay in milliseconds
    pub base_ms: u64,
    /// Upper bound on any single delay in milliseconds
    pub cap_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            cap_ms: 30_000,
        }
    }
}

impl BackoffPolicy {
    /// Upper bound of the jitter window for `attempt`
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_ms.saturating_mul(factor).min(self.cap_ms))
    }

    /// Jittered delay drawn from `rng`
    pub fn delay_with<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let ceiling = u64::try_from(self.ceiling(attempt).as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rng.gen_range(0..=ceiling))
    }

    /// Jittered delay from the thread-local generator
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    /// Reject a cap below the base delay
    pub fn validate(&self) -> Result<(), String> {
        if self.cap_ms < self.base_ms {
            return Err("backoff cap_ms must be at least base_ms".to_string());
        }
        Ok(())
    }
}
