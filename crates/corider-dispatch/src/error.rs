//! Dispatch errors

use corider_core::{Profile, RideRequestId, TransitionError};
use corider_transport::{CallError, ChannelError, TransportError};

/// Failure of a rider or driver operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Request failed in transit or was refused
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Operation does not fit the ride's current state
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    /// Broadcast window closed before the accept landed
    #[error("offer for ride request {request_id} expired")]
    OfferExpired {
        /// Offer that expired
        request_id: RideRequestId,
    },

    /// Another driver won the offer
    #[error("ride request {request_id} was taken by another driver")]
    AlreadyTaken {
        /// Offer that was lost
        request_id: RideRequestId,
    },

    /// Session lost; log in again and resume
    #[error("login required")]
    RequiresLogin,

    /// Session is active under the other profile
    #[error("operation requires the {required} profile, session is {active}")]
    WrongProfile {
        /// Profile the operation needs
        required: Profile,
        /// Profile the session holds
        active: Profile,
    },

    /// Backend has no such ride request
    #[error("unknown ride request {request_id}")]
    UnknownRide {
        /// Id that has no record
        request_id: RideRequestId,
    },

    /// Live channel failed
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Response body did not match the expected shape
    #[error("failed to decode dispatch response: {message}")]
    Decode {
        /// Decoder message
        message: String,
    },

    /// Coordinator shut down or ride actor finished
    #[error("dispatch closed")]
    Closed,
}

impl From<CallError> for DispatchError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Transport(err) => Self::Transport(err),
            CallError::RequiresLogin => Self::RequiresLogin,
            CallError::Decode { message } => Self::Decode { message },
        }
    }
}
