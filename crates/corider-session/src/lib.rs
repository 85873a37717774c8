//! # Corider Session
//!
//! Explicit session context for the dispatch client. [`SessionManager`] logs
//! in, refreshes tokens (proactively near expiry and on 401, single-flight),
//! switches between rider and driver profiles, and publishes a
//! [`SessionStatus`](corider_core::SessionStatus) watch channel the dispatch
//! coordinator observes to suspend work when a new login is required.

pub mod config;
pub mod error;
pub mod manager;
pub mod wire;

pub use config::SessionConfig;
pub use error::SessionError;
pub use manager::SessionManager;
