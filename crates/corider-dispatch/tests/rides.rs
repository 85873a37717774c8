//! Rider and driver flows end to end against the in-memory backend

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use assert_matches::assert_matches;
use common::*;
use corider_core::{DriverId, OfferKind, Profile, RideRequestId, RideRequestState};
use corider_dispatch::{DispatchError, OfferUpdate, WithdrawReason};
use corider_testkit::*;
use corider_transport::{Method, DRIVER_QUEUE, RIDER_QUEUE};
use futures::StreamExt;

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn rider_and_driver_complete_a_ride() {
    let server = seeded_server();
    let rider = Client::rider(&server).await;
    let driver = Client::driver(&server, DRIVER_ONE_EMAIL).await;

    let mut feed = driver.dispatch.go_online().unwrap();
    wait_until("driver subscribed", || {
        server.is_subscribed(DRIVER_ONE_USER, DRIVER_QUEUE)
    })
    .await;

    let mut ride = rider.dispatch.request_ride(campus_ride()).await.unwrap();
    assert_eq!(ride.state(), RideRequestState::Broadcast);
    assert_eq!(ride.snapshot().version, 1);
    wait_until("rider subscribed", || {
        server.is_subscribed(RIDER_USER, RIDER_QUEUE)
    })
    .await;

    let offer = match next_offer(&mut feed).await {
        OfferUpdate::Offered(offer) => offer,
        other => panic!("expected an offer, got {other:?}"),
    };
    assert_eq!(offer.request_id, ride.id());
    assert_eq!(offer.kind, OfferKind::Broadcast);

    let trip = driver.dispatch.accept(offer.request_id).await.unwrap();
    assert_eq!(trip.state(), RideRequestState::Accepted);
    assert_eq!(trip.snapshot().driver_id, Some(DriverId::new(DRIVER_ONE_USER.value())));

    let seen = next_change(&mut ride).await;
    assert_eq!(seen.state, RideRequestState::Accepted);
    assert_eq!(seen.version, 2);

    trip.confirm().await.unwrap();
    trip.start().await.unwrap();
    let done = trip.complete().await.unwrap();
    assert_eq!(done.state, RideRequestState::Completed);
    assert_eq!(done.version, 5);

    for expected in [
        RideRequestState::Confirmed,
        RideRequestState::Ongoing,
        RideRequestState::Completed,
    ] {
        assert_eq!(next_change(&mut ride).await.state, expected);
    }
    assert_eq!(next_update(&mut ride).await, None);

    let driver_states: Vec<_> = trip
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .filter_map(|u| u.ride().map(|r| r.state))
        .collect();
    assert_eq!(
        driver_states,
        vec![
            RideRequestState::Accepted,
            RideRequestState::Confirmed,
            RideRequestState::Ongoing,
            RideRequestState::Completed,
        ]
    );
    assert_eq!(Some(ride.snapshot()), server.ride(ride.id()));

    rider.shutdown();
    driver.shutdown();
}

// ============================================================================
// Offer races
// ============================================================================

#[tokio::test]
async fn second_driver_loses_the_race_without_local_change() {
    let server = seeded_server();
    let rider = Client::rider(&server).await;
    let first = Client::driver(&server, DRIVER_ONE_EMAIL).await;
    let second = Client::driver(&server, DRIVER_TWO_EMAIL).await;

    let mut first_feed = first.dispatch.go_online().unwrap();
    let mut second_feed = second.dispatch.go_online().unwrap();
    wait_until("drivers subscribed", || {
        server.is_subscribed(DRIVER_ONE_USER, DRIVER_QUEUE)
            && server.is_subscribed(DRIVER_TWO_USER, DRIVER_QUEUE)
    })
    .await;

    let ride = rider.dispatch.request_ride(campus_ride()).await.unwrap();
    let id = ride.id();
    assert_matches!(next_offer(&mut first_feed).await, OfferUpdate::Offered(_));
    assert_matches!(next_offer(&mut second_feed).await, OfferUpdate::Offered(_));

    // Keep the acceptance event from reaching the second driver first
    server.hold_events();
    let won = first.dispatch.accept(id).await.unwrap();
    assert_eq!(won.state(), RideRequestState::Accepted);

    assert_matches!(
        second.dispatch.accept(id).await,
        Err(DispatchError::AlreadyTaken { request_id }) if request_id == id
    );
    let local = second.dispatch.ride(id).unwrap();
    assert_eq!(local.state, RideRequestState::Broadcast);
    assert_eq!(local.version, 1);
    assert_eq!(local.driver_id, None);

    server.release_events();
    assert_eq!(
        next_offer(&mut second_feed).await,
        OfferUpdate::Withdrawn {
            request_id: id,
            reason: WithdrawReason::TakenByOther
        }
    );
    wait_until("loser stops tracking", || second.dispatch.ride(id).is_none()).await;
    assert_eq!(
        server.ride(id).unwrap().driver_id,
        Some(DriverId::new(DRIVER_ONE_USER.value()))
    );

    rider.shutdown();
    first.shutdown();
    second.shutdown();
}

#[tokio::test]
async fn declined_offer_is_reoffered_to_the_rider() {
    let server = seeded_server();
    let rider = Client::rider(&server).await;
    let driver = Client::driver(&server, DRIVER_ONE_EMAIL).await;

    let mut feed = driver.dispatch.go_online().unwrap();
    wait_until("driver subscribed", || {
        server.is_subscribed(DRIVER_ONE_USER, DRIVER_QUEUE)
    })
    .await;
    let mut ride = rider.dispatch.request_ride(campus_ride()).await.unwrap();
    wait_until("rider subscribed", || {
        server.is_subscribed(RIDER_USER, RIDER_QUEUE)
    })
    .await;
    let id = next_offer(&mut feed).await.request_id();

    driver.dispatch.reject(id).await.unwrap();

    let seen = next_change(&mut ride).await;
    assert_eq!(seen.state, RideRequestState::Broadcast);
    assert_eq!(seen.rejections, 1);
    assert_eq!(seen.version, 2);
    wait_until("declined offer dropped", || driver.dispatch.ride(id).is_none()).await;

    rider.shutdown();
    driver.shutdown();
}

#[tokio::test]
async fn accept_against_a_stale_version_is_refused() {
    let server = seeded_server();
    let rider = Client::rider(&server).await;
    let first = Client::driver(&server, DRIVER_ONE_EMAIL).await;
    let second = Client::driver(&server, DRIVER_TWO_EMAIL).await;
    let mut first_feed = first.dispatch.go_online().unwrap();
    let mut second_feed = second.dispatch.go_online().unwrap();
    wait_until("drivers subscribed", || {
        server.is_subscribed(DRIVER_ONE_USER, DRIVER_QUEUE)
            && server.is_subscribed(DRIVER_TWO_USER, DRIVER_QUEUE)
    })
    .await;

    let ride = rider.dispatch.request_ride(campus_ride()).await.unwrap();
    let id = ride.id();
    assert_matches!(next_offer(&mut first_feed).await, OfferUpdate::Offered(_));
    assert_matches!(next_offer(&mut second_feed).await, OfferUpdate::Offered(_));

    // The second driver never hears about the decline and still holds version 1
    server.hold_events();
    first.dispatch.reject(id).await.unwrap();
    assert_eq!(server.ride(id).unwrap().version, 2);

    assert_matches!(
        second.dispatch.accept(id).await,
        Err(DispatchError::AlreadyTaken { request_id }) if request_id == id
    );
    let stored = server.ride(id).unwrap();
    assert_eq!(stored.state, RideRequestState::Broadcast);
    assert_eq!(stored.driver_id, None);
    assert_eq!(stored.version, 2);

    server.discard_held_events();
    rider.shutdown();
    first.shutdown();
    second.shutdown();
}

#[tokio::test]
async fn direct_offer_accepts_through_the_direct_endpoint() {
    let server = seeded_server();
    let rider = Client::rider(&server).await;
    let driver = Client::driver(&server, DRIVER_TWO_EMAIL).await;

    let ride = rider.dispatch.request_ride(campus_ride()).await.unwrap();
    let mut feed = driver.dispatch.go_online().unwrap();
    wait_until("driver subscribed", || {
        server.is_subscribed(DRIVER_TWO_USER, DRIVER_QUEUE)
    })
    .await;

    server.send_direct_offer(ride.id(), DRIVER_TWO_USER).unwrap();
    let offer = match next_offer(&mut feed).await {
        OfferUpdate::Offered(offer) => offer,
        other => panic!("expected an offer, got {other:?}"),
    };
    assert_eq!(offer.kind, OfferKind::Direct);

    let trip = driver.dispatch.accept(ride.id()).await.unwrap();
    assert_eq!(trip.state(), RideRequestState::Accepted);
    let direct = format!("/ride-requests/{}/accept", ride.id());
    assert_eq!(server.request_count(Method::Put, &direct), 1);

    rider.shutdown();
    driver.shutdown();
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn rider_cancel_withdraws_the_offer() {
    let server = seeded_server();
    let rider = Client::rider(&server).await;
    let driver = Client::driver(&server, DRIVER_ONE_EMAIL).await;

    let mut feed = driver.dispatch.go_online().unwrap();
    wait_until("driver subscribed", || {
        server.is_subscribed(DRIVER_ONE_USER, DRIVER_QUEUE)
    })
    .await;
    let mut ride = rider.dispatch.request_ride(campus_ride()).await.unwrap();
    assert_matches!(next_offer(&mut feed).await, OfferUpdate::Offered(_));

    let cancelled = ride.cancel().await.unwrap();
    assert_eq!(cancelled.state, RideRequestState::Cancelled);

    assert_eq!(
        next_offer(&mut feed).await,
        OfferUpdate::Withdrawn {
            request_id: ride.id(),
            reason: WithdrawReason::Cancelled
        }
    );
    assert_eq!(
        next_change(&mut ride).await.state,
        RideRequestState::Cancelled
    );
    assert_eq!(next_update(&mut ride).await, None);

    rider.shutdown();
    driver.shutdown();
}

#[tokio::test]
async fn cancel_is_refused_once_the_ride_started() {
    let server = seeded_server();
    let rider = Client::rider(&server).await;
    let driver = Client::driver(&server, DRIVER_ONE_EMAIL).await;

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
    trip.confirm().await.unwrap();
    trip.start().await.unwrap();
    while next_change(&mut ride).await.state != RideRequestState::Ongoing {}

    assert_matches!(
        ride.cancel().await,
        Err(DispatchError::InvalidTransition(_))
    );
    let path = format!("/ride-requests/{}", ride.id());
    assert_eq!(server.request_count(Method::Delete, &path), 0);
    assert_eq!(server.ride(ride.id()).unwrap().state, RideRequestState::Ongoing);

    rider.shutdown();
    driver.shutdown();
}

// ============================================================================
// Profiles
// ============================================================================

#[tokio::test]
async fn operations_require_the_matching_profile() {
    let server = seeded_server();
    let rider = Client::rider(&server).await;
    let driver = Client::driver(&server, DRIVER_ONE_EMAIL).await;

    assert_matches!(
        rider.dispatch.go_online(),
        Err(DispatchError::WrongProfile {
            required: Profile::Driver,
            active: Profile::Rider
        })
    );
    assert_matches!(
        driver.dispatch.request_ride(campus_ride()).await,
        Err(DispatchError::WrongProfile {
            required: Profile::Rider,
            ..
        })
    );
    assert!(server.rides().is_empty());
    assert_matches!(
        rider.dispatch.accept(RideRequestId::new(1)).await,
        Err(DispatchError::WrongProfile {
            required: Profile::Driver,
            ..
        })
    );

    rider.shutdown();
    driver.shutdown();
}

#[tokio::test]
async fn offline_driver_stops_receiving_offers() {
    let server = seeded_server();
    let rider = Client::rider(&server).await;
    let driver = Client::driver(&server, DRIVER_ONE_EMAIL).await;

    let mut feed = driver.dispatch.go_online().unwrap();
    wait_until("driver subscribed", || {
        server.is_subscribed(DRIVER_ONE_USER, DRIVER_QUEUE)
    })
    .await;
    let first = rider.dispatch.request_ride(campus_ride()).await.unwrap();
    assert_eq!(next_offer(&mut feed).await.request_id(), first.id());

    driver.dispatch.go_offline();
    assert_eq!(feed.next().await, None);
    wait_until("driver unsubscribed", || {
        !server.is_subscribed(DRIVER_ONE_USER, DRIVER_QUEUE)
    })
    .await;
    wait_until("offer dismissed", || driver.dispatch.tracked() == 0).await;

    rider.shutdown();
    driver.shutdown();
}

#[tokio::test]
async fn ride_streams_end_on_shutdown() {
    let server = seeded_server();
    let rider = Client::rider(&server).await;
    let mut ride = rider.dispatch.request_ride(campus_ride()).await.unwrap();

    rider.dispatch.shutdown();

    assert_eq!(next_update(&mut ride).await, None);
    assert_matches!(
        rider.dispatch.request_ride(campus_ride()).await,
        Err(DispatchError::Closed)
    );
    assert_matches!(ride.cancel().await, Err(DispatchError::Closed));
    rider.transport.shutdown();
}

#[tokio::test]
async fn updates_carry_only_this_riders_requests() {
    let server = seeded_server();
    let rider = Client::rider(&server).await;
    let mut ride = rider.dispatch.request_ride(campus_ride()).await.unwrap();
    wait_until("rider subscribed", || {
        server.is_subscribed(RIDER_USER, RIDER_QUEUE)
    })
    .await;

    let other = Client::login(&server, COMMUTER_EMAIL, Profile::Rider).await;
    let foreign = other.dispatch.request_ride(campus_ride()).await.unwrap();
    foreign.cancel().await.unwrap();

    ride.cancel().await.unwrap();
    let seen = next_change(&mut ride).await;
    assert_eq!(seen.id, ride.id());
    assert_eq!(seen.state, RideRequestState::Cancelled);
    assert_eq!(next_update(&mut ride).await, None);

    rider.shutdown();
    other.shutdown();
}

// ============================================================================
// Handle lifetime
// ============================================================================

#[tokio::test]
async fn dropping_a_ride_handle_stops_its_actor() {
    let server = seeded_server();
    let rider = Client::rider(&server).await;
    let driver = Client::driver(&server, DRIVER_ONE_EMAIL).await;
    let mut feed = driver.dispatch.go_online().unwrap();
    wait_until("driver subscribed", || {
        server.is_subscribed(DRIVER_ONE_USER, DRIVER_QUEUE)
    })
    .await;

    let ride = rider.dispatch.request_ride(campus_ride()).await.unwrap();
    let id = ride.id();
    assert_eq!(rider.dispatch.tracked(), 1);
    drop(ride);
    wait_until("rider actor stopped", || rider.dispatch.tracked() == 0).await;

    assert_eq!(next_offer(&mut feed).await.request_id(), id);
    let trip = driver.dispatch.accept(id).await.unwrap();
    assert_eq!(driver.dispatch.tracked(), 1);
    drop(trip);
    wait_until("driver actor stopped", || driver.dispatch.tracked() == 0).await;
    assert_eq!(server.ride(id).unwrap().state, RideRequestState::Accepted);

    rider.shutdown();
    driver.shutdown();
}

#[tokio::test]
async fn tracking_a_ride_twice_keeps_the_newer_handle_live() {
    let server = seeded_server();
    let rider = Client::rider(&server).await;
    let driver = Client::driver(&server, DRIVER_ONE_EMAIL).await;
    let mut feed = driver.dispatch.go_online().unwrap();
    wait_until("driver subscribed", || {
        server.is_subscribed(DRIVER_ONE_USER, DRIVER_QUEUE)
    })
    .await;

    let first = rider.dispatch.request_ride(campus_ride()).await.unwrap();
    let id = first.id();
    wait_until("rider subscribed", || {
        server.is_subscribed(RIDER_USER, RIDER_QUEUE)
    })
    .await;
    let mut second = rider.dispatch.track_ride(id).await.unwrap();
    drop(first);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(rider.dispatch.tracked(), 1);

    assert_eq!(next_offer(&mut feed).await.request_id(), id);
    driver.dispatch.accept(id).await.unwrap();

    let seen = next_change(&mut second).await;
    assert_eq!(seen.state, RideRequestState::Accepted);
    assert_eq!(second.state(), RideRequestState::Accepted);
    assert_eq!(rider.dispatch.tracked(), 1);

    rider.shutdown();
    driver.shutdown();
}

#[tokio::test]
async fn tracking_a_finished_ride_yields_it_once() {
    let server = seeded_server();
    let rider = Client::rider(&server).await;
    let ride = rider.dispatch.request_ride(campus_ride()).await.unwrap();
    let id = ride.id();
    ride.cancel().await.unwrap();
    drop(ride);
    wait_until("actor stopped", || rider.dispatch.tracked() == 0).await;

    let mut again = rider.dispatch.track_ride(id).await.unwrap();
    let seen = next_change(&mut again).await;
    assert_eq!(seen.id, id);
    assert_eq!(seen.state, RideRequestState::Cancelled);
    assert_eq!(next_update(&mut again).await, None);
    assert_eq!(rider.dispatch.tracked(), 0);
    assert_matches!(
        again.cancel().await,
        Err(DispatchError::InvalidTransition(_))
    );

    rider.shutdown();
}
