//! Reconciler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Gap and buffer limits of one reconciler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// How long an out-of-order event may wait for the missing sequence
    pub gap_hold_ms: u64,
    /// Buffered events per ride request before a resync is forced
    pub buffer_limit: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            gap_hold_ms: 2_000,
            buffer_limit: 64,
        }
    }
}

impl ReconcilerConfig {
    /// Gap hold as a [`Duration`]
    pub fn gap_hold(&self) -> Duration {
        Duration::from_millis(self.gap_hold_ms)
    }

    /// Reject limits that would stall or disable reconciliation
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_limit == 0 {
            return Err("buffer_limit must be at least 1".to_string());
        }
        if self.gap_hold_ms == 0 {
            return Err("gap_hold_ms must be positive".to_string());
        }
        Ok(())
    }
}
