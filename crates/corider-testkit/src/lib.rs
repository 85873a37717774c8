//! Corider Testing Infrastructure
//!
//! Shared doubles for the session and dispatch integration tests: an
//! in-memory dispatch backend that serves both the REST and the channel seams,
//! a manually advanced clock, and account and ride fixtures.
//!
//! # Usage
//!
//! ```rust,no_run
//! use corider_testkit::*;
//!
//! let server = seeded_server();
//! let ride = campus_ride();
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

pub mod clock;
pub mod fixtures;
pub mod server;

pub use clock::ManualClock;
pub use fixtures::*;
pub use server::{
    FakeDispatchServer, ACCESS_TOKEN_TTL_SECS, ALREADY_ACCEPTED_ID, BAD_CREDENTIALS_ID,
    BROADCAST_CLOSED_ID, DEFAULT_BROADCAST_WINDOW_SECS, INVALID_STATE_ID, LOST_RESPONSE_TIMEOUT,
    PROFILE_MISSING_ID, REFRESH_INVALID_ID, TOKEN_EXPIRED_ID, VERIFICATION_PENDING_ID,
};

/// Install a test-writer subscriber once per process; later calls are no-ops
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
