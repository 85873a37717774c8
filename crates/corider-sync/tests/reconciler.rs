//! Ordering, gap, duplicate and resync behaviour of the event reconciler

#![allow(clippy::unwrap_used, clippy::expect_used)]

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use corider_core::{
    Adoption, Applied, ChannelEvent, DriverId, Location, RideRequest, RideRequestId,
    RideRequestState, RideStateMachine, RiderId, DEFAULT_MAX_REJECTIONS,
};
use corider_sync::{EventReconciler, ReconcileError, ReconcilerConfig, ResyncReason};
use std::time::Duration;
use tokio::time::Instant;

const RIDE: RideRequestId = RideRequestId(7);
const WINNER: DriverId = DriverId(11);
const LATECOMER: DriverId = DriverId(12);

fn ride(state: RideRequestState, version: u64, driver_id: Option<DriverId>) -> RideRequest {
    let requested_at = Utc.with_ymd_and_hms(2025, 1, 6, 8, 0, 0).unwrap();
    RideRequest {
        id: RIDE,
        rider_id: RiderId(1),
        origin: Location::labelled(10.76, 106.68, "Main Library"),
        destination: Location::labelled(10.77, 106.69, "Dormitory B"),
        requested_at,
        state,
        driver_id,
        version,
        rejections: 0,
        broadcast_expires_at: Some(requested_at + chrono::Duration::seconds(30)),
        client_reference: None,
    }
}

fn reconciler_at(request: RideRequest, config: ReconcilerConfig) -> EventReconciler {
    EventReconciler::new(
        RideStateMachine::new(request, DEFAULT_MAX_REJECTIONS),
        config,
    )
}

fn broadcasting() -> EventReconciler {
    reconciler_at(
        ride(RideRequestState::Broadcast, 1, None),
        ReconcilerConfig::default(),
    )
}

fn accepted(sequence: u64, driver_id: DriverId) -> ChannelEvent {
    ChannelEvent::OfferAccepted {
        request_id: RIDE,
        sequence,
        driver_id,
    }
}

fn confirmed(sequence: u64) -> ChannelEvent {
    ChannelEvent::RideConfirmed {
        request_id: RIDE,
        sequence,
    }
}

fn started(sequence: u64) -> ChannelEvent {
    ChannelEvent::RideStarted {
        request_id: RIDE,
        sequence,
    }
}

fn completed(sequence: u64) -> ChannelEvent {
    ChannelEvent::RideCompleted {
        request_id: RIDE,
        sequence,
    }
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn in_order_events_apply_immediately() {
    let mut reconciler = broadcasting();
    let now = Instant::now();

    let out = reconciler.ingest(accepted(2, WINNER), now).unwrap();
    assert!(out.changed());
    assert_eq!(out.applied.len(), 1);
    assert_eq!(reconciler.snapshot().state, RideRequestState::Accepted);
    assert_eq!(reconciler.snapshot().driver_id, Some(WINNER));

    reconciler.ingest(confirmed(3), now).unwrap();
    assert_eq!(reconciler.version(), 3);
    assert_eq!(reconciler.snapshot().state, RideRequestState::Confirmed);
    assert_eq!(reconciler.gap_deadline(), None);
}

#[test]
fn replayed_event_is_a_noop() {
    let mut reconciler = broadcasting();
    let now = Instant::now();
    reconciler.ingest(accepted(2, WINNER), now).unwrap();
    let before = reconciler.snapshot().clone();

    let replay = reconciler.ingest(accepted(2, WINNER), now).unwrap();

    assert!(!replay.changed());
    assert!(replay.applied.is_empty());
    assert_eq!(replay.resync, None);
    assert_eq!(reconciler.snapshot(), &before);
}

#[test]
fn later_sequence_waits_for_the_gap_to_fill() {
    let mut reconciler = broadcasting();
    let now = Instant::now();

    let held = reconciler.ingest(confirmed(3), now).unwrap();
    assert!(held.applied.is_empty());
    assert_eq!(reconciler.pending(), 1);
    assert_eq!(reconciler.version(), 1);
    assert_eq!(
        reconciler.gap_deadline(),
        Some(now + Duration::from_secs(2))
    );

    let filled = reconciler.ingest(accepted(2, WINNER), now).unwrap();
    let sequences: Vec<u64> = filled.applied.iter().map(|a| a.event.sequence()).collect();
    assert_eq!(sequences, vec![2, 3]);
    assert_eq!(reconciler.snapshot().state, RideRequestState::Confirmed);
    assert_eq!(reconciler.pending(), 0);
    assert_eq!(reconciler.gap_deadline(), None);
}

#[test]
fn rejection_below_limit_keeps_broadcasting() {
    let mut reconciler = broadcasting();
    let out = reconciler
        .ingest(
            ChannelEvent::OfferRejected {
                request_id: RIDE,
                sequence: 2,
                driver_id: LATECOMER,
            },
            Instant::now(),
        )
        .unwrap();

    assert_matches!(
        out.applied[0].outcome,
        Applied::Reoffered {
            rejections: 1,
            version: 2
        }
    );
    assert_eq!(reconciler.snapshot().state, RideRequestState::Broadcast);
}

#[test]
fn second_acceptance_only_advances_the_version() {
    let mut reconciler = reconciler_at(
        ride(RideRequestState::Accepted, 2, Some(WINNER)),
        ReconcilerConfig::default(),
    );

    let out = reconciler
        .ingest(accepted(3, LATECOMER), Instant::now())
        .unwrap();

    assert!(!out.changed());
    assert_matches!(out.applied[0].outcome, Applied::Ignored { .. });
    assert_eq!(reconciler.version(), 3);
    assert_eq!(reconciler.snapshot().driver_id, Some(WINNER));

    // The next sequence is not mistaken for a gap
    reconciler.ingest(confirmed(4), Instant::now()).unwrap();
    assert_eq!(reconciler.snapshot().state, RideRequestState::Confirmed);
}

// ============================================================================
// Resync triggers
// ============================================================================

#[test]
fn unfilled_gap_times_out() {
    let mut reconciler = broadcasting();
    let start = Instant::now();
    reconciler.ingest(started(4), start).unwrap();

    assert_eq!(reconciler.poll_gap(start + Duration::from_millis(1_999)), None);
    assert_eq!(
        reconciler.poll_gap(start + Duration::from_secs(2)),
        Some(ResyncReason::GapTimeout)
    );
}

#[test]
fn buffer_overflow_forces_resync() {
    let mut reconciler = reconciler_at(
        ride(RideRequestState::Broadcast, 1, None),
        ReconcilerConfig {
            buffer_limit: 2,
            ..ReconcilerConfig::default()
        },
    );
    let now = Instant::now();

    assert_eq!(reconciler.ingest(confirmed(3), now).unwrap().resync, None);
    assert_eq!(reconciler.ingest(started(4), now).unwrap().resync, None);
    let out = reconciler.ingest(completed(5), now).unwrap();

    assert_eq!(out.resync, Some(ResyncReason::BufferOverflow));
    assert_eq!(reconciler.pending(), 0);
    assert_eq!(reconciler.gap_deadline(), None);
}

#[test]
fn event_that_does_not_fit_requests_resync() {
    let mut reconciler = broadcasting();

    let out = reconciler.ingest(started(2), Instant::now()).unwrap();

    assert_eq!(out.resync, Some(ResyncReason::Diverged));
    assert!(out.applied.is_empty());
    assert_eq!(reconciler.version(), 1);
    assert_eq!(reconciler.snapshot().state, RideRequestState::Broadcast);
}

#[test]
fn foreign_event_is_refused() {
    let mut reconciler = broadcasting();
    let foreign = ChannelEvent::RideConfirmed {
        request_id: RideRequestId(99),
        sequence: 2,
    };

    assert_matches!(
        reconciler.ingest(foreign, Instant::now()),
        Err(ReconcileError::WrongRequest {
            expected: RIDE,
            actual: RideRequestId(99)
        })
    );
}

// ============================================================================
// Resync
// ============================================================================

#[test]
fn resync_discards_buffer_and_drains_newer_events() {
    let mut reconciler = broadcasting();
    let now = Instant::now();
    reconciler.ingest(started(4), now).unwrap();

    assert_eq!(reconciler.begin_resync(ResyncReason::Reconnected), 1);
    assert!(reconciler.is_resyncing());

    // Arrives while the snapshot is in flight
    reconciler.ingest(completed(6), now).unwrap();
    assert_eq!(reconciler.pending(), 1);

    let out = reconciler
        .reseed(ride(RideRequestState::Ongoing, 5, Some(WINNER)), now)
        .unwrap();

    assert_matches!(
        out.adoption,
        Some(Adoption::Adopted {
            from: RideRequestState::Broadcast,
            to: RideRequestState::Ongoing,
            version: 5
        })
    );
    assert_eq!(out.applied.len(), 1);
    assert!(!reconciler.is_resyncing());
    assert_eq!(reconciler.snapshot().state, RideRequestState::Completed);
    assert_eq!(reconciler.version(), 6);
}

#[test]
fn older_resync_snapshot_is_stale() {
    let mut reconciler = broadcasting();
    let now = Instant::now();
    reconciler.ingest(accepted(2, WINNER), now).unwrap();
    reconciler.begin_resync(ResyncReason::Reconnected);

    let out = reconciler
        .reseed(ride(RideRequestState::Broadcast, 1, None), now)
        .unwrap();

    assert_eq!(out.adoption, Some(Adoption::Stale));
    assert!(!reconciler.is_resyncing());
    assert_eq!(reconciler.snapshot().state, RideRequestState::Accepted);
}

#[test]
fn confirmed_snapshot_drains_buffered_successors() {
    let mut reconciler = broadcasting();
    let now = Instant::now();
    reconciler.ingest(confirmed(3), now).unwrap();

    let out = reconciler
        .adopt_confirmed(ride(RideRequestState::Accepted, 2, Some(WINNER)), now)
        .unwrap();

    assert!(out.changed());
    assert_eq!(out.applied.len(), 1);
    assert_eq!(reconciler.snapshot().state, RideRequestState::Confirmed);
    assert_eq!(reconciler.gap_deadline(), None);
}
