//! Values surfaced to riders and drivers

use corider_core::{RideOffer, RideRequest, RideRequestId};

/// Change to a ride the caller participates in
#[derive(Debug, Clone, PartialEq)]
pub enum RideUpdate {
    /// New authoritative snapshot of the ride
    Changed(RideRequest),
    /// Session lost; operations fail with `RequiresLogin` until resumed
    Suspended,
    /// Session restored and the ride resynced
    Resumed,
}

impl RideUpdate {
    /// Snapshot carried by a [`RideUpdate::Changed`]
    pub fn ride(&self) -> Option<&RideRequest> {
        match self {
            Self::Changed(ride) => Some(ride),
            _ => None,
        }
    }
}

/// Why an offer left the driver feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WithdrawReason {
    /// Another driver accepted
    TakenByOther,
    /// Broadcast window elapsed
    Expired,
    /// Rider cancelled
    Cancelled,
    /// Declined by too many drivers
    Rejected,
}

/// Driver feed item
#[derive(Debug, Clone, PartialEq)]
pub enum OfferUpdate {
    /// New offer for this driver
    Offered(RideOffer),
    /// Offer no longer available
    Withdrawn {
        /// Offer being withdrawn
        request_id: RideRequestId,
        /// Why it left the feed
        reason: WithdrawReason,
    },
}

impl OfferUpdate {
    /// Ride request the item concerns
    pub fn request_id(&self) -> RideRequestId {
        match self {
            Self::Offered(offer) => offer.request_id,
            Self::Withdrawn { request_id, .. } => *request_id,
        }
    }
}
