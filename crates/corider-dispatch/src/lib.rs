//! # Corider Dispatch
//!
//! Rider and driver ride flows on top of the transport adapter:
//!
//! - [`DispatchCoordinator`]: requests rides, opens the driver offer feed,
//!   accepts and declines offers
//! - [`RiderRide`] / [`DriverRide`]: per-ride handles that stream
//!   [`RideUpdate`]s and carry the operations each side may perform
//! - [`DriverFeed`]: stream of [`OfferUpdate`]s for an online driver
//!
//! Every tracked ride runs as its own actor task owning an
//! [`EventReconciler`](corider_sync::EventReconciler), so channel events,
//! REST results and resyncs for one ride are applied strictly one at a time.
//! The coordinator watches the session status and suspends all rides while a
//! new login is required.

mod actor;
pub mod api;
pub mod config;
pub mod coordinator;
pub mod error;
mod registry;
pub mod ride;
pub mod tasks;
pub mod update;

pub use api::{RideApi, RideOp};
pub use config::DispatchConfig;
pub use coordinator::DispatchCoordinator;
pub use error::DispatchError;
pub use ride::{DriverFeed, DriverRide, RiderRide};
pub use tasks::TaskRegistry;
pub use update::{OfferUpdate, RideUpdate, WithdrawReason};
