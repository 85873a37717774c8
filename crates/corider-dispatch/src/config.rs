//! Dispatch configuration

use corider_core::DEFAULT_MAX_REJECTIONS;
use corider_sync::ReconcilerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Coordinator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-ride event ordering
    pub reconciler: ReconcilerConfig,
    /// Declines before a broadcast request terminates as REJECTED
    pub max_rejections: u32,
    /// Events parked for ride requests that have no actor yet, across all ids
    pub orphan_limit: usize,
    /// How long a parked event waits for its actor
    pub orphan_ttl_ms: u64,
    /// How long a finished ride id keeps swallowing late events
    pub finished_retention_ms: u64,
    /// Delay before retrying a failed resync fetch
    pub resync_retry_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            reconciler: ReconcilerConfig::default(),
            max_rejections: DEFAULT_MAX_REJECTIONS,
            orphan_limit: 32,
            orphan_ttl_ms: 5_000,
            finished_retention_ms: 600_000,
            resync_retry_ms: 1_000,
        }
    }
}

impl DispatchConfig {
    /// Orphan TTL as a [`Duration`]
    pub fn orphan_ttl(&self) -> Duration {
        Duration::from_millis(self.orphan_ttl_ms)
    }

    /// Finished-id retention as a [`Duration`]
    pub fn finished_retention(&self) -> Duration {
        Duration::from_millis(self.finished_retention_ms)
    }

    /// Resync retry delay as a [`Duration`]
    pub fn resync_retry(&self) -> Duration {
        Duration::from_millis(self.resync_retry_ms)
    }

    /// Check limits and nested reconciler settings
    pub fn validate(&self) -> Result<(), String> {
        self.reconciler
            .validate()
            .map_err(|e| format!("reconciler: {e}"))?;
        if self.max_rejections == 0 {
            return Err("max_rejections must be at least 1".to_string());
        }
        if self.finished_retention_ms < self.orphan_ttl_ms {
            return Err("finished_retention_ms must be at least orphan_ttl_ms".to_string());
        }
        if self.resync_retry_ms == 0 {
            return Err("resync_retry_ms must be positive".to_string());
        }
        Ok(())
    }
}
