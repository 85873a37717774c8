//! # Corider Sync
//!
//! Event reconciliation for ride requests. Channel events are at-least-once
//! and may arrive out of order or not at all; [`EventReconciler`] turns them
//! into an in-order stream of state machine transitions and tells its owner
//! when only an authoritative REST snapshot can restore consistency.

pub mod config;
pub mod error;
pub mod reconciler;

pub use config::ReconcilerConfig;
pub use error::ReconcileError;
pub use reconciler::{AppliedEvent, EventReconciler, Reconciled, ResyncReason};
