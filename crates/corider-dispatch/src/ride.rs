//! Handles returned to riders and drivers
//!
//! Each handle is a [`Stream`] of updates for one ride (or, for
//! [`DriverFeed`], of offers). A ride stream ends after the terminal
//! snapshot; the feed ends when the driver goes offline.

use crate::actor::RideHandle;
use crate::api::RideOp;
use crate::error::DispatchError;
use crate::update::{OfferUpdate, RideUpdate};
use corider_core::{RideRequest, RideRequestId, RideRequestState};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// A ride the logged-in rider requested
#[derive(Debug)]
pub struct RiderRide {
    handle: RideHandle,
    updates: UnboundedReceiverStream<RideUpdate>,
}

impl RiderRide {
    pub(crate) fn new(handle: RideHandle, updates: mpsc::UnboundedReceiver<RideUpdate>) -> Self {
        Self {
            handle,
            updates: UnboundedReceiverStream::new(updates),
        }
    }

    /// Ride request id
    pub fn id(&self) -> RideRequestId {
        self.handle.id()
    }

    /// Latest local snapshot
    pub fn snapshot(&self) -> RideRequest {
        self.handle.snapshot()
    }

    /// Current local state
    pub fn state(&self) -> RideRequestState {
        self.handle.snapshot().state
    }

    /// Observe the local snapshot without consuming updates
    pub fn watch(&self) -> watch::Receiver<RideRequest> {
        self.handle.watch()
    }

    /// Cancel the request; allowed until the ride starts
    pub async fn cancel(&self) -> Result<RideRequest, DispatchError> {
        self.handle.operate(RideOp::Cancel).await
    }
}

impl Stream for RiderRide {
    type Item = RideUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.updates).poll_next(cx)
    }
}

/// A ride the logged-in driver won
#[derive(Debug)]
pub struct DriverRide {
    handle: RideHandle,
    updates: UnboundedReceiverStream<RideUpdate>,
}

impl DriverRide {
    pub(crate) fn new(handle: RideHandle, updates: mpsc::UnboundedReceiver<RideUpdate>) -> Self {
        Self {
            handle,
            updates: UnboundedReceiverStream::new(updates),
        }
    }

    /// Ride request id
    pub fn id(&self) -> RideRequestId {
        self.handle.id()
    }

    /// Latest local snapshot
    pub fn snapshot(&self) -> RideRequest {
        self.handle.snapshot()
    }

    /// Current local state
    pub fn state(&self) -> RideRequestState {
        self.handle.snapshot().state
    }

    /// Observe the local snapshot without consuming updates
    pub fn watch(&self) -> watch::Receiver<RideRequest> {
        self.handle.watch()
    }

    /// Confirm the pickup
    pub async fn confirm(&self) -> Result<RideRequest, DispatchError> {
        self.handle.operate(RideOp::Confirm).await
    }

    /// Start the ride
    pub async fn start(&self) -> Result<RideRequest, DispatchError> {
        self.handle.operate(RideOp::Start).await
    }

    /// Complete the ride
    pub async fn complete(&self) -> Result<RideRequest, DispatchError> {
        self.handle.operate(RideOp::Complete).await
    }

    /// Cancel the ride before it starts
    pub async fn cancel(&self) -> Result<RideRequest, DispatchError> {
        self.handle.operate(RideOp::Cancel).await
    }
}

impl Stream for DriverRide {
    type Item = RideUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.updates).poll_next(cx)
    }
}

/// Offers reaching an online driver
#[derive(Debug)]
pub struct DriverFeed {
    offers: UnboundedReceiverStream<OfferUpdate>,
}

impl DriverFeed {
    pub(crate) fn new(offers: mpsc::UnboundedReceiver<OfferUpdate>) -> Self {
        Self {
            offers: UnboundedReceiverStream::new(offers),
        }
    }
}

impl Stream for DriverFeed {
    type Item = OfferUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.offers).poll_next(cx)
    }
}
