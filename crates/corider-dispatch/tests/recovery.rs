//! Recovery paths: reconnects, sequence gaps, lost responses, expiry and
//! session loss

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use assert_matches::assert_matches;
use common::*;
use corider_core::{DriverId, Profile, RideRequestState};
use corider_dispatch::{DispatchError, DriverRide, RideUpdate, RiderRide};
use corider_testkit::*;
use corider_transport::{Method, DRIVER_QUEUE, RIDER_QUEUE};
use std::time::Duration;

/// Rider with a ride accepted by driver one, both subscribed
async fn accepted_ride(server: &FakeDispatchServer) -> (Client, Client, RiderRide, DriverRide) {
    let rider = Client::rider(server).await;
    let driver = Client::driver(server, DRIVER_ONE_EMAIL).await;

    let _feed = driver.dispatch.go_online().unwrap();
    wait_until("driver subscribed", || {
        server.is_subscribed(DRIVER_ONE_USER, DRIVER_QUEUE)
    })
    .await;
    let mut ride = rider.dispatch.request_ride(campus_ride()).await.unwrap();
    wait_until("rider subscribed", || {
        server.is_subscribed(RIDER_USER, RIDER_QUEUE)
    })
    .await;
    wait_until("offer tracked", || driver.dispatch.ride(ride.id()).is_some()).await;

    let trip = driver.dispatch.accept(ride.id()).await.unwrap();
    assert_eq!(next_change(&mut ride).await.state, RideRequestState::Accepted);
    (rider, driver, ride, trip)
}

// ============================================================================
// Channel ordering and reconnects
// ============================================================================

#[tokio::test]
async fn reconnect_resyncs_missed_transitions() {
    let server = seeded_server();
    let (rider, driver, mut ride, trip) = accepted_ride(&server).await;

    server.set_channel_available(false);
    server.drop_connections();
    trip.confirm().await.unwrap();
    trip.start().await.unwrap();
    server.set_channel_available(true);

    let seen = next_change(&mut ride).await;
    assert_eq!(seen.state, RideRequestState::Ongoing);
    assert_eq!(seen.version, 4);
    assert_eq!(Some(ride.snapshot()), server.ride(ride.id()));

    rider.shutdown();
    driver.shutdown();
}

#[tokio::test]
async fn reversed_delivery_applies_in_sequence_without_resync() {
    let server = seeded_server();
    let (rider, driver, mut ride, trip) = accepted_ride(&server).await;
    let path = format!("/ride-requests/{}", ride.id());

    server.hold_events();
    trip.confirm().await.unwrap();
    trip.start().await.unwrap();
    server.release_events_reversed();

    let seen = next_change(&mut ride).await;
    assert_eq!(seen.state, RideRequestState::Ongoing);
    assert_eq!(seen.version, 4);
    assert_eq!(server.request_count(Method::Get, &path), 0);

    rider.shutdown();
    driver.shutdown();
}

#[tokio::test(start_paused = true)]
async fn unfilled_gap_resyncs_after_the_hold() {
    let server = seeded_server();
    let (rider, driver, mut ride, trip) = accepted_ride(&server).await;
    let path = format!("/ride-requests/{}", ride.id());

    // The confirmation is lost on both queues; only the start arrives
    server.hold_events();
    trip.confirm().await.unwrap();
    assert_eq!(server.discard_held_events(), 2);
    trip.start().await.unwrap();

    let seen = next_change(&mut ride).await;
    assert_eq!(seen.state, RideRequestState::Ongoing);
    assert_eq!(seen.version, 4);
    assert_eq!(server.request_count(Method::Get, &path), 1);

    rider.shutdown();
    driver.shutdown();
}

// ============================================================================
// Lost responses
// ============================================================================

#[tokio::test]
async fn lost_create_response_recovers_the_request() {
    let server = seeded_server();
    let rider = Client::rider(&server).await;

    server.lose_next_response(Method::Post, "/ride-requests");
    let ride = rider.dispatch.request_ride(campus_ride()).await.unwrap();

    let rides = server.rides();
    assert_eq!(rides.len(), 1);
    assert_eq!(ride.snapshot(), rides[0]);
    assert_eq!(ride.state(), RideRequestState::Broadcast);
    assert_eq!(server.request_count(Method::Get, "/ride-requests/rider"), 1);

    rider.shutdown();
}

#[tokio::test]
async fn lost_accept_response_resolves_through_resync() {
    let server = seeded_server();
    let rider = Client::rider(&server).await;
    let driver = Client::driver(&server, DRIVER_ONE_EMAIL).await;
    let _feed = driver.dispatch.go_online().unwrap();
    wait_until("driver subscribed", || {
        server.is_subscribed(DRIVER_ONE_USER, DRIVER_QUEUE)
    })
    .await;
    let ride = rider.dispatch.request_ride(campus_ride()).await.unwrap();
    wait_until("offer tracked", || driver.dispatch.ride(ride.id()).is_some()).await;

    let accept = format!("/ride-requests/{}/broadcast/accept", ride.id());
    server.lose_next_response(Method::Put, &accept);
    let trip = driver.dispatch.accept(ride.id()).await.unwrap();

    let me = Some(DriverId::new(DRIVER_ONE_USER.value()));
    assert_eq!(trip.state(), RideRequestState::Accepted);
    assert_eq!(trip.snapshot().driver_id, me);
    assert_eq!(server.ride(ride.id()).unwrap().driver_id, me);
    assert_eq!(server.request_count(Method::Put, &accept), 1);

    rider.shutdown();
    driver.shutdown();
}

// ============================================================================
// Broadcast window
// ============================================================================

#[tokio::test(start_paused = true)]
async fn broadcast_window_expires_locally() {
    let server = seeded_server();
    let rider = Client::rider(&server).await;
    let mut ride = rider.dispatch.request_ride(campus_ride()).await.unwrap();
    let path = format!("/ride-requests/{}", ride.id());

    server
        .clock()
        .advance(chrono::Duration::seconds(DEFAULT_BROADCAST_WINDOW_SECS + 1));
    tokio::time::advance(Duration::from_secs(31)).await;

    let seen = next_change(&mut ride).await;
    assert_eq!(seen.state, RideRequestState::Expired);
    assert_eq!(seen.version, 2);
    assert_eq!(server.request_count(Method::Get, &path), 1);
    assert_eq!(next_update(&mut ride).await, None);

    assert_matches!(
        ride.cancel().await,
        Err(DispatchError::InvalidTransition(_))
    );
    rider.shutdown();
}

#[tokio::test]
async fn expired_offer_is_refused_without_a_request() {
    let server = seeded_server();
    let rider = Client::rider(&server).await;
    let driver = Client::driver(&server, DRIVER_ONE_EMAIL).await;
    let _feed = driver.dispatch.go_online().unwrap();
    wait_until("driver subscribed", || {
        server.is_subscribed(DRIVER_ONE_USER, DRIVER_QUEUE)
    })
    .await;
    let ride = rider.dispatch.request_ride(campus_ride()).await.unwrap();
    wait_until("offer tracked", || driver.dispatch.ride(ride.id()).is_some()).await;

    server
        .clock()
        .advance(chrono::Duration::seconds(DEFAULT_BROADCAST_WINDOW_SECS + 1));

    assert_matches!(
        driver.dispatch.accept(ride.id()).await,
        Err(DispatchError::OfferExpired { request_id }) if request_id == ride.id()
    );
    let accept = format!("/ride-requests/{}/broadcast/accept", ride.id());
    assert_eq!(server.request_count(Method::Put, &accept), 0);

    rider.shutdown();
    driver.shutdown();
}

// ============================================================================
// Session loss
// ============================================================================

#[tokio::test]
async fn lost_session_suspends_until_login() {
    let server = seeded_server();
    let rider = Client::rider(&server).await;
    let mut ride = rider.dispatch.request_ride(campus_ride()).await.unwrap();

    server.expire_access_tokens();
    server.revoke_refresh_tokens();

    assert_matches!(ride.cancel().await, Err(DispatchError::RequiresLogin));
    assert_eq!(next_update(&mut ride).await, Some(RideUpdate::Suspended));

    // Suspended rides fail fast
    let requests = server.requests().len();
    assert_matches!(ride.cancel().await, Err(DispatchError::RequiresLogin));
    assert_eq!(server.requests().len(), requests);

    rider
        .session
        .login(RIDER_EMAIL, PASSWORD, Profile::Rider)
        .await
        .unwrap();
    assert_eq!(next_update(&mut ride).await, Some(RideUpdate::Resumed));

    let cancelled = ride.cancel().await.unwrap();
    assert_eq!(cancelled.state, RideRequestState::Cancelled);
    rider.shutdown();
}
