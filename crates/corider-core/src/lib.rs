//! # Corider Core - Ride Dispatch Foundation
//!
//! Shared vocabulary for every other corider crate:
//!
//! - **Identifiers**: numeric newtypes for ride requests, riders, drivers and users
//! - **Ride model**: [`RideRequest`], [`RideOffer`] and the lifecycle states
//! - **Channel events**: the tagged union pushed over the STOMP queues
//! - **State machine**: the only code path allowed to mutate a ride request
//! - **Session**: credentials of the logged-in device and its observable status
//! - **Time**: a [`Clock`] seam so expiry logic can be driven from tests
//!
//! Nothing in this crate performs I/O.

pub mod errors;
pub mod event;
pub mod identifiers;
pub mod ride;
pub mod session;
pub mod state_machine;
pub mod time;

pub use errors::TransitionError;
pub use event::{ChannelEvent, ChannelEventKind};
pub use identifiers::{DriverId, Profile, RideRequestId, RiderId, UserId};
pub use ride::{Location, NewRideRequest, OfferKind, RideOffer, RideRequest, RideRequestState};
pub use session::{Session, SessionStatus};
pub use state_machine::{Adoption, Applied, RideStateMachine, Transition, DEFAULT_MAX_REJECTIONS};
pub use time::{Clock, SystemClock};
