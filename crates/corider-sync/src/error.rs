//! Reconciler errors

use corider_core::{RideRequestId, TransitionError};

/// Reconciler input that cannot be applied
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    /// Event or snapshot addressed to another ride request
    #[error("event for ride request {actual} reached the reconciler of {expected}")]
    WrongRequest {
        /// Ride request the reconciler owns
        expected: RideRequestId,
        /// Ride request named by the input
        actual: RideRequestId,
    },

    /// Authoritative snapshot did not fit the local lifecycle
    #[error(transparent)]
    Transition(#[from] TransitionError),
}
