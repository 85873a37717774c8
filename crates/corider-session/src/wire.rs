//! Auth endpoint payloads

use corider_core::{Profile, UserId};
use serde::{Deserialize, Serialize};

/// Login endpoint
pub const LOGIN_PATH: &str = "/auth/login";
/// Token refresh endpoint
pub const REFRESH_PATH: &str = "/auth/refresh";
/// Logout endpoint
pub const LOGOUT_PATH: &str = "/auth/logout";
/// Profile switch endpoint
pub const SWITCH_PROFILE_PATH: &str = "/users/me/switch-profile";

/// Login body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Account email
    pub email: String,
    /// Account password
    pub password: String,
    /// Profile to activate
    pub target_profile: Profile,
}

/// Refresh body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    /// Refresh token of the current session
    pub refresh_token: String,
}

/// Profile switch body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchProfileRequest {
    /// Profile to activate
    pub target_profile: Profile,
}

/// Token pair returned by login, refresh and profile switch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Bearer token for API calls
    pub access_token: String,
    /// Token used to mint the next pair
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    /// Account id
    pub user_id: UserId,
    /// Profile the tokens act as
    pub active_profile: Profile,
}
