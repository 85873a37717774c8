//! Session configuration

use serde::{Deserialize, Serialize};

/// Session manager settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Refresh proactively when the access token expires within this many milliseconds
    pub refresh_skew_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_skew_ms: 30_000,
        }
    }
}

impl SessionConfig {
    /// Refresh skew as a chrono duration
    pub fn refresh_skew(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.refresh_skew_ms).unwrap_or(i64::MAX))
    }

    /// Reject a skew longer than any sane token lifetime
    pub fn validate(&self) -> Result<(), String> {
        if self.refresh_skew_ms > 3_600_000 {
            return Err("refresh_skew_ms must not exceed one hour".to_string());
        }
        Ok(())
    }
}
