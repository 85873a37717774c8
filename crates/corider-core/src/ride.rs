//! Ride request model
//!
//! [`RideRequest`] is the authoritative record shared between the REST API and
//! the channel; [`RideOffer`] is the short-lived projection a candidate driver
//! sees while the request is broadcast.

use crate::identifiers::{DriverId, RideRequestId, RiderId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a ride request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideRequestState {
    /// Drafted locally, not yet accepted by the server
    Created,
    /// Open for driver offers
    Broadcast,
    /// A driver won the offer
    Accepted,
    /// The winning driver confirmed the pickup
    Confirmed,
    /// Rider on board
    Ongoing,
    /// Ride finished
    Completed,
    /// Cancelled by rider or driver
    Cancelled,
    /// Too many drivers declined
    Rejected,
    /// Broadcast window elapsed without acceptance
    Expired,
}

impl RideRequestState {
    /// Wire name of the state
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Broadcast => "BROADCAST",
            Self::Accepted => "ACCEPTED",
            Self::Confirmed => "CONFIRMED",
            Self::Ongoing => "ONGOING",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Terminal states never transition again
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::Rejected | Self::Expired
        )
    }

    /// States from which either party may cancel
    pub const fn is_cancellable(self) -> bool {
        matches!(self, Self::Broadcast | Self::Accepted | Self::Confirmed)
    }

    /// Whether `next` is reachable in exactly one step.
    ///
    /// `Broadcast -> Broadcast` is the re-offer after a driver reject.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Broadcast)
                | (Self::Broadcast, Self::Broadcast)
                | (Self::Broadcast, Self::Accepted)
                | (Self::Broadcast, Self::Expired)
                | (Self::Broadcast, Self::Rejected)
                | (Self::Broadcast, Self::Cancelled)
                | (Self::Accepted, Self::Confirmed)
                | (Self::Accepted, Self::Cancelled)
                | (Self::Confirmed, Self::Ongoing)
                | (Self::Confirmed, Self::Cancelled)
                | (Self::Ongoing, Self::Completed)
        )
    }
}

impl fmt::Display for RideRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pickup or drop-off point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// WGS84 latitude
    pub latitude: f64,
    /// WGS84 longitude
    pub longitude: f64,
    /// Point-of-interest name, when picked from the campus POI list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Location {
    /// Bare coordinate
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            label: None,
        }
    }

    /// Coordinate with a POI label
    pub fn labelled(latitude: f64, longitude: f64, label: impl Into<String>) -> Self {
        Self {
            latitude,
            longitude,
            label: Some(label.into()),
        }
    }
}

/// Authoritative ride request record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRequest {
    /// Backend identifier; unassigned on a local draft
    pub id: RideRequestId,
    /// Rider who requested the ride
    pub rider_id: RiderId,
    /// Pickup point
    pub origin: Location,
    /// Drop-off point
    pub destination: Location,
    /// When the rider asked
    pub requested_at: DateTime<Utc>,
    /// Lifecycle state
    pub state: RideRequestState,
    /// Winning driver once accepted
    #[serde(default)]
    pub driver_id: Option<DriverId>,
    /// Bumped by one on every accepted transition; never decreases
    pub version: u64,
    /// Declines counted against the rejection limit
    #[serde(default)]
    pub rejections: u32,
    /// End of the broadcast window
    #[serde(default)]
    pub broadcast_expires_at: Option<DateTime<Utc>>,
    /// Idempotency key of the create that produced this record
    #[serde(default)]
    pub client_reference: Option<Uuid>,
}

impl RideRequest {
    /// Local CREATED record for a draft that has not reached the server yet
    pub fn draft(new: &NewRideRequest, rider_id: RiderId, now: DateTime<Utc>) -> Self {
        Self {
            id: RideRequestId::UNASSIGNED,
            rider_id,
            origin: new.origin.clone(),
            destination: new.destination.clone(),
            requested_at: now,
            state: RideRequestState::Created,
            driver_id: None,
            version: 0,
            rejections: 0,
            broadcast_expires_at: None,
            client_reference: Some(new.client_reference),
        }
    }

    /// Whether the broadcast window has elapsed at `now`
    pub fn broadcast_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.state == RideRequestState::Broadcast
            && self.broadcast_expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// Rider input for a new ride request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRideRequest {
    /// Pickup point
    pub origin: Location,
    /// Drop-off point
    pub destination: Location,
    /// Free text for the driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Idempotency key used to recover a create whose response was lost
    pub client_reference: Uuid,
}

impl NewRideRequest {
    /// Draft with a fresh client reference
    pub fn new(origin: Location, destination: Location) -> Self {
        Self {
            origin,
            destination,
            note: None,
            client_reference: Uuid::new_v4(),
        }
    }

    /// Attach a note for the driver
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// How an offer reached the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferKind {
    /// Open to every candidate driver; first accept wins
    Broadcast,
    /// Addressed to the driver whose shared ride the rider asked to join
    Direct,
}

/// Driver-facing, time-bounded invitation for one ride request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideOffer {
    /// Request on offer
    pub request_id: RideRequestId,
    /// Rider who requested the ride
    pub rider_id: RiderId,
    /// Pickup point
    pub origin: Location,
    /// Drop-off point
    pub destination: Location,
    /// When the rider asked
    pub requested_at: DateTime<Utc>,
    /// Request version the offer was cut from
    pub version: u64,
    /// Accepts after this instant fail
    pub expires_at: DateTime<Utc>,
    /// Broadcast or direct
    #[serde(default = "default_offer_kind")]
    pub kind: OfferKind,
}

fn default_offer_kind() -> OfferKind {
    OfferKind::Broadcast
}

impl RideOffer {
    /// Whether the broadcast window closed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// BROADCAST record the offer stands for
    pub fn to_request(&self) -> RideRequest {
        RideRequest {
            id: self.request_id,
            rider_id: self.rider_id,
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            requested_at: self.requested_at,
            state: RideRequestState::Broadcast,
            driver_id: None,
            version: self.version,
            rejections: 0,
            broadcast_expires_at: Some(self.expires_at),
            client_reference: None,
        }
    }
}
