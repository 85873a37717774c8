//! Session errors

use corider_core::Profile;
use corider_transport::{CallError, TransportError};

/// Error id the backend returns for unverified accounts
pub const VERIFICATION_PENDING_ID: &str = "auth.unauthorized.email-verification-pending";
/// Error id the backend returns when the requested profile does not exist
pub const PROFILE_MISSING_ID: &str = "user.validation.profile-not-exists";

/// Session lifecycle failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No usable session; the user must log in
    #[error("login required")]
    RequiresLogin,

    /// Backend refused the email and password
    #[error("invalid email or password")]
    InvalidCredentials,

    /// Account exists but the email address is not verified yet
    #[error("email verification pending")]
    VerificationPending,

    /// Account has no profile of the requested kind
    #[error("account has no {profile} profile")]
    ProfileMissing {
        /// Profile that was requested
        profile: Profile,
    },

    /// Request failed before the session changed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Response body did not match the expected shape
    #[error("failed to decode session response: {message}")]
    Decode {
        /// Decoder message
        message: String,
    },
}

impl SessionError {
    /// Build a [`SessionError::Decode`]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Classify a failed login or profile switch
    pub(crate) fn from_auth_failure(err: TransportError, profile: Profile) -> Self {
        match err.api_error().map(|e| e.id.as_str()) {
            Some(VERIFICATION_PENDING_ID) => return Self::VerificationPending,
            Some(PROFILE_MISSING_ID) => return Self::ProfileMissing { profile },
            _ => {}
        }
        match err.status() {
            Some(401) => Self::InvalidCredentials,
            _ => Self::Transport(err),
        }
    }
}

impl From<CallError> for SessionError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Transport(err) => Self::Transport(err),
            CallError::RequiresLogin => Self::RequiresLogin,
            CallError::Decode { message } => Self::Decode { message },
        }
    }
}
