//! Channel events
//!
//! Every message on the rider and driver queues is one [`ChannelEvent`]. The
//! server stamps each event with the version the ride request reached by the
//! transition it announces, so `sequence` doubles as the implied version.

use crate::identifiers::{DriverId, Profile, RideRequestId};
use crate::ride::RideOffer;
use crate::state_machine::Transition;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tagged union pushed over the STOMP queues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelEvent {
    /// Request opened for offers (or re-offered)
    OfferCreated {
        /// Request the event belongs to
        request_id: RideRequestId,
        /// Request version after this event
        sequence: u64,
        /// Offer as shown to drivers
        offer: RideOffer,
    },
    /// A driver won the offer
    OfferAccepted {
        /// Request the event belongs to
        request_id: RideRequestId,
        /// Request version after this event
        sequence: u64,
        /// Winning driver
        driver_id: DriverId,
    },
    /// A driver declined the offer
    OfferRejected {
        /// Request the event belongs to
        request_id: RideRequestId,
        /// Request version after this event
        sequence: u64,
        /// Declining driver
        driver_id: DriverId,
    },
    /// Winning driver confirmed the pickup
    RideConfirmed {
        /// Request the event belongs to
        request_id: RideRequestId,
        /// Request version after this event
        sequence: u64,
    },
    /// Rider picked up
    RideStarted {
        /// Request the event belongs to
        request_id: RideRequestId,
        /// Request version after this event
        sequence: u64,
    },
    /// Rider dropped off
    RideCompleted {
        /// Request the event belongs to
        request_id: RideRequestId,
        /// Request version after this event
        sequence: u64,
    },
    /// Cancelled by either side
    RideCancelled {
        /// Request the event belongs to
        request_id: RideRequestId,
        /// Request version after this event
        sequence: u64,
        /// Side that cancelled, when the backend says
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cancelled_by: Option<Profile>,
    },
    /// Broadcast window closed without a winner
    RideExpired {
        /// Request the event belongs to
        request_id: RideRequestId,
        /// Request version after this event
        sequence: u64,
    },
}

/// Discriminant of [`ChannelEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelEventKind {
    /// `OFFER_CREATED`
    OfferCreated,
    /// `OFFER_ACCEPTED`
    OfferAccepted,
    /// `OFFER_REJECTED`
    OfferRejected,
    /// `RIDE_CONFIRMED`
    RideConfirmed,
    /// `RIDE_STARTED`
    RideStarted,
    /// `RIDE_COMPLETED`
    RideCompleted,
    /// `RIDE_CANCELLED`
    RideCancelled,
    /// `RIDE_EXPIRED`
    RideExpired,
}

impl ChannelEventKind {
    /// Wire tag
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OfferCreated => "OFFER_CREATED",
            Self::OfferAccepted => "OFFER_ACCEPTED",
            Self::OfferRejected => "OFFER_REJECTED",
            Self::RideConfirmed => "RIDE_CONFIRMED",
            Self::RideStarted => "RIDE_STARTED",
            Self::RideCompleted => "RIDE_COMPLETED",
            Self::RideCancelled => "RIDE_CANCELLED",
            Self::RideExpired => "RIDE_EXPIRED",
        }
    }
}

impl fmt::Display for ChannelEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ChannelEvent {
    /// Ride request the event belongs to
    pub fn request_id(&self) -> RideRequestId {
        match self {
            Self::OfferCreated { request_id, .. }
            | Self::OfferAccepted { request_id, .. }
            | Self::OfferRejected { request_id, .. }
            | Self::RideConfirmed { request_id, .. }
            | Self::RideStarted { request_id, .. }
            | Self::RideCompleted { request_id, .. }
            | Self::RideCancelled { request_id, .. }
            | Self::RideExpired { request_id, .. } => *request_id,
        }
    }

    /// Server-assigned sequence number, equal to the implied version
    pub fn sequence(&self) -> u64 {
        match self {
            Self::OfferCreated { sequence, .. }
            | Self::OfferAccepted { sequence, .. }
            | Self::OfferRejected { sequence, .. }
            | Self::RideConfirmed { sequence, .. }
            | Self::RideStarted { sequence, .. }
            | Self::RideCompleted { sequence, .. }
            | Self::RideCancelled { sequence, .. }
            | Self::RideExpired { sequence, .. } => *sequence,
        }
    }

    /// Discriminant of this event
    pub fn kind(&self) -> ChannelEventKind {
        match self {
            Self::OfferCreated { .. } => ChannelEventKind::OfferCreated,
            Self::OfferAccepted { .. } => ChannelEventKind::OfferAccepted,
            Self::OfferRejected { .. } => ChannelEventKind::OfferRejected,
            Self::RideConfirmed { .. } => ChannelEventKind::RideConfirmed,
            Self::RideStarted { .. } => ChannelEventKind::RideStarted,
            Self::RideCompleted { .. } => ChannelEventKind::RideCompleted,
            Self::RideCancelled { .. } => ChannelEventKind::RideCancelled,
            Self::RideExpired { .. } => ChannelEventKind::RideExpired,
        }
    }

    /// State machine transition this event announces
    pub fn transition(&self) -> Transition {
        match self {
            Self::OfferCreated { .. } => Transition::Broadcast,
            Self::OfferAccepted { driver_id, .. } => Transition::Accept {
                driver_id: *driver_id,
            },
            Self::OfferRejected { driver_id, .. } => Transition::Reject {
                driver_id: *driver_id,
            },
            Self::RideConfirmed { .. } => Transition::Confirm,
            Self::RideStarted { .. } => Transition::Start,
            Self::RideCompleted { .. } => Transition::Complete,
            Self::RideCancelled { .. } => Transition::Cancel,
            Self::RideExpired { .. } => Transition::Expire,
        }
    }

    /// Offer payload, present only on `OFFER_CREATED`
    pub fn offer(&self) -> Option<&RideOffer> {
        match self {
            Self::OfferCreated { offer, .. } => Some(offer),
            _ => None,
        }
    }
}
