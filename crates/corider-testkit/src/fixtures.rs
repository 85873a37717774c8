//! Accounts, rides and fast-cycling configuration shared across test suites

use crate::clock::ManualClock;
use crate::server::FakeDispatchServer;
use corider_core::{Location, NewRideRequest, Profile, UserId};
use corider_transport::{BackoffPolicy, RetryPolicy, TransportConfig};
use std::sync::Arc;

pub const PASSWORD: &str = "correct-horse";

pub const RIDER_EMAIL: &str = "rider@campus.example";
pub const RIDER_USER: UserId = UserId(1);

pub const DRIVER_ONE_EMAIL: &str = "driver.one@campus.example";
pub const DRIVER_ONE_USER: UserId = UserId(11);

pub const DRIVER_TWO_EMAIL: &str = "driver.two@campus.example";
pub const DRIVER_TWO_USER: UserId = UserId(12);

/// Holds both profiles
pub const COMMUTER_EMAIL: &str = "commuter@campus.example";
pub const COMMUTER_USER: UserId = UserId(21);

pub const UNVERIFIED_EMAIL: &str = "fresh@campus.example";
pub const UNVERIFIED_USER: UserId = UserId(31);

/// Server with one rider, two drivers, a dual-profile commuter and an
/// unverified account, all on a fresh [`ManualClock`]
pub fn seeded_server() -> FakeDispatchServer {
    let server = FakeDispatchServer::new(Arc::new(ManualClock::morning()));
    server.register(RIDER_EMAIL, PASSWORD, RIDER_USER, &[Profile::Rider]);
    server.register(DRIVER_ONE_EMAIL, PASSWORD, DRIVER_ONE_USER, &[Profile::Driver]);
    server.register(DRIVER_TWO_EMAIL, PASSWORD, DRIVER_TWO_USER, &[Profile::Driver]);
    server.register(
        COMMUTER_EMAIL,
        PASSWORD,
        COMMUTER_USER,
        &[Profile::Rider, Profile::Driver],
    );
    server.register_unverified(UNVERIFIED_EMAIL, PASSWORD, UNVERIFIED_USER);
    server
}

/// Library to dormitory request with a fresh client reference
pub fn campus_ride() -> NewRideRequest {
    NewRideRequest::new(
        Location::labelled(10.7626, 106.6822, "Main Library"),
        Location::labelled(10.7701, 106.6904, "Dormitory B"),
    )
}

/// Transport configuration with millisecond-scale backoff
pub fn fast_transport_config() -> TransportConfig {
    TransportConfig {
        rest_retry: RetryPolicy {
            max_attempts: 3,
            backoff: BackoffPolicy {
                base_ms: 5,
                cap_ms: 20,
            },
        },
        reconnect: BackoffPolicy {
            base_ms: 10,
            cap_ms: 100,
        },
        ..TransportConfig::default()
    }
}
