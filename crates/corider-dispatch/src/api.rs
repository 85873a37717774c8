//! Typed ride endpoints over the transport adapter

use corider_core::{NewRideRequest, OfferKind, RideRequest, RideRequestId};
use corider_transport::{ApiRequest, CallError, TransportAdapter};
use serde::{Deserialize, Serialize};

/// Accept payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptBody {
    /// Version the driver saw; the backend refuses stale accepts
    pub expected_version: u64,
}

/// Body naming a ride request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideRef {
    /// Ride request to act on
    pub ride_request_id: RideRequestId,
}

/// Mutating ride operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RideOp {
    /// Driver takes an offer
    Accept,
    /// Driver declines an offer
    Reject,
    /// Driver confirms pickup
    Confirm,
    /// Ride begins
    Start,
    /// Ride ends
    Complete,
    /// Rider or driver withdraws
    Cancel,
}

impl RideOp {
    /// Label used in logs and errors
    pub const fn name(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Confirm => "confirm",
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
        }
    }
}

impl std::fmt::Display for RideOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Ride request endpoints
#[derive(Debug, Clone)]
pub struct RideApi {
    transport: TransportAdapter,
}

impl RideApi {
    /// Wrap an authenticated transport
    pub fn new(transport: TransportAdapter) -> Self {
        Self { transport }
    }

    /// Create a ride request as the rider
    pub async fn create(&self, new: &NewRideRequest) -> Result<RideRequest, CallError> {
        self.transport
            .call_json(ApiRequest::post("/ride-requests").json(new)?)
            .await
    }

    /// Every request of the logged-in rider
    pub async fn mine(&self) -> Result<Vec<RideRequest>, CallError> {
        self.transport
            .call_json(ApiRequest::get("/ride-requests/rider"))
            .await
    }

    /// Fetch the authoritative record of `id`
    pub async fn get(&self, id: RideRequestId) -> Result<RideRequest, CallError> {
        self.transport
            .call_json(ApiRequest::get(format!("/ride-requests/{id}")))
            .await
    }

    /// Perform `op` on `id`; `version` is the local version the caller saw
    pub async fn perform(
        &self,
        op: RideOp,
        id: RideRequestId,
        version: u64,
        kind: OfferKind,
    ) -> Result<RideRequest, CallError> {
        let request = match op {
            RideOp::Accept => {
                let path = match kind {
                    OfferKind::Broadcast => format!("/ride-requests/{id}/broadcast/accept"),
                    OfferKind::Direct => format!("/ride-requests/{id}/accept"),
                };
                ApiRequest::put(path).json(&AcceptBody {
                    expected_version: version,
                })?
            }
            RideOp::Reject => {
                ApiRequest::put(format!("/ride-requests/{id}/reject")).with_body(serde_json::json!({}))
            }
            RideOp::Confirm => ApiRequest::put(format!("/ride-requests/{id}/confirm")),
            RideOp::Start => ApiRequest::post("/rides/start-ride-request")
                .json(&RideRef { ride_request_id: id })?,
            RideOp::Complete => ApiRequest::post("/rides/complete-ride-request")
                .json(&RideRef { ride_request_id: id })?,
            RideOp::Cancel => ApiRequest::delete(format!("/ride-requests/{id}")),
        };
        self.transport.call_json(request).await
    }
}
