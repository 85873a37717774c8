//! Authenticated session record

use crate::identifiers::{Profile, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Credentials of the logged-in device
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Short-lived bearer token
    pub access_token: String,
    /// Token exchanged for a new pair on refresh
    pub refresh_token: String,
    /// Expiry of the access token
    pub expires_at: DateTime<Utc>,
    /// Profile the tokens are scoped to
    pub profile: Profile,
    /// Account the tokens belong to
    pub user_id: UserId,
    /// Bumped on every login and refresh
    #[serde(default)]
    pub generation: u64,
}

impl Session {
    /// Whether the access token expires within `skew` of `now`
    pub fn expires_within(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        now + skew >= self.expires_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("profile", &self.profile)
            .field("user_id", &self.user_id)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Session status broadcast to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session on this device
    LoggedOut,
    /// Tokens usable
    Active {
        /// Profile the tokens are scoped to
        profile: Profile,
        /// Logged-in account
        user_id: UserId,
    },
    /// Refresh failed; every operation must stop until the user logs in again
    RequiresLogin,
}
