//! State machine errors

use crate::identifiers::RideRequestId;
use crate::ride::RideRequestState;

/// Rejected attempt to move a ride request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// Transition not adjacent to the current state
    #[error("invalid transition {transition} from {from} for ride request {request_id}")]
    InvalidTransition {
        /// Ride request the transition targeted
        request_id: RideRequestId,
        /// State the request was in
        from: RideRequestState,
        /// Name of the attempted transition or target state
        transition: &'static str,
    },

    /// Authoritative snapshot describes a different ride request
    #[error("snapshot for ride request {actual} cannot update ride request {expected}")]
    SnapshotMismatch {
        /// Locally tracked ride request
        expected: RideRequestId,
        /// Ride request the snapshot belongs to
        actual: RideRequestId,
    },
}

impl TransitionError {
    /// Create an invalid transition error
    pub fn invalid(
        request_id: RideRequestId,
        from: RideRequestState,
        transition: &'static str,
    ) -> Self {
        Self::InvalidTransition {
            request_id,
            from,
            transition,
        }
    }
}
