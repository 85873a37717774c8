//! Event reconciler
//!
//! Sits between the channel and one ride's [`RideStateMachine`]. Channel
//! sequence numbers equal the version the event produces, so with local
//! version `v`:
//!
//! - `seq <= v`: duplicate or replay, discarded
//! - `seq == v + 1`: applied, then any buffered successors are drained
//! - `seq > v + 1`: buffered behind the gap
//!
//! A gap that outlives the hold, or a buffer that outgrows its limit, asks the
//! owner for a resync. During a resync buffered events are discarded; events
//! arriving before the authoritative snapshot is in are buffered and drained
//! against it afterwards.

use crate::config::ReconcilerConfig;
use crate::error::ReconcileError;
use corider_core::{
    Adoption, Applied, ChannelEvent, RideRequest, RideRequestId, RideStateMachine, Transition,
    TransitionError,
};
use std::collections::BTreeMap;
use std::fmt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Why authoritative state must be fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResyncReason {
    /// Channel reconnected; events may have been missed
    Reconnected,
    /// A sequence gap outlived the hold
    GapTimeout,
    /// Too many events waited behind a gap
    BufferOverflow,
    /// An in-order event did not fit local state
    Diverged,
    /// A mutating REST call timed out
    UnknownOutcome,
    /// Broadcast window elapsed locally
    WindowElapsed,
    /// Session restored after a login
    Resumed,
}

impl ResyncReason {
    /// Label used in logs
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reconnected => "reconnected",
            Self::GapTimeout => "gap_timeout",
            Self::BufferOverflow => "buffer_overflow",
            Self::Diverged => "diverged",
            Self::UnknownOutcome => "unknown_outcome",
            Self::WindowElapsed => "window_elapsed",
            Self::Resumed => "resumed",
        }
    }
}

impl fmt::Display for ResyncReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event that reached the state machine
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedEvent {
    /// Event as received
    pub event: ChannelEvent,
    /// What the state machine did with it
    pub outcome: Applied,
}

/// Result of feeding the reconciler
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciled {
    /// Set when an authoritative snapshot was offered
    pub adoption: Option<Adoption>,
    /// Events applied, in sequence order
    pub applied: Vec<AppliedEvent>,
    /// Owner must fetch the ride and call [`EventReconciler::reseed`]
    pub resync: Option<ResyncReason>,
}

impl Reconciled {
    /// Whether the ride record changed
    pub fn changed(&self) -> bool {
        self.adoption.as_ref().is_some_and(Adoption::changed)
            || self.applied.iter().any(|a| a.outcome.changed())
    }

    fn resync(reason: ResyncReason) -> Self {
        Self {
            resync: Some(reason),
            ..Self::default()
        }
    }
}

/// Orders channel events for one ride request
#[derive(Debug, Clone)]
pub struct EventReconciler {
    machine: RideStateMachine,
    pending: BTreeMap<u64, ChannelEvent>,
    gap_since: Option<Instant>,
    resyncing: bool,
    config: ReconcilerConfig,
}

impl EventReconciler {
    /// Start from a seeded state machine
    pub fn new(machine: RideStateMachine, config: ReconcilerConfig) -> Self {
        Self {
            machine,
            pending: BTreeMap::new(),
            gap_since: None,
            resyncing: false,
            config,
        }
    }

    /// Current local record
    pub fn snapshot(&self) -> &RideRequest {
        self.machine.snapshot()
    }

    /// Ride request this reconciler orders
    pub fn id(&self) -> RideRequestId {
        self.machine.id()
    }

    /// Local version
    pub fn version(&self) -> u64 {
        self.machine.version()
    }

    /// Events waiting behind a gap
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Whether a resync was requested and not yet reseeded
    pub fn is_resyncing(&self) -> bool {
        self.resyncing
    }

    /// When [`poll_gap`](Self::poll_gap) will report a timeout
    pub fn gap_deadline(&self) -> Option<Instant> {
        self.gap_since.map(|since| since + self.config.gap_hold())
    }

    /// Feed one channel event
    pub fn ingest(
        &mut self,
        event: ChannelEvent,
        now: Instant,
    ) -> Result<Reconciled, ReconcileError> {
        self.check_identity(event.request_id())?;
        let sequence = event.sequence();
        let version = self.machine.version();

        if sequence <= version {
            debug!(
                request_id = %event.request_id(),
                sequence,
                version,
                kind = %event.kind(),
                "Discarded duplicate event"
            );
            return Ok(Reconciled::default());
        }
        if self.resyncing || sequence > version + 1 {
            return Ok(self.park(event, now));
        }

        let mut applied = Vec::new();
        let resync = match self.apply_event(event, &mut applied) {
            Ok(()) => self.drain(&mut applied),
            Err(reason) => Some(reason),
        };
        let out = Reconciled {
            adoption: None,
            applied,
            resync,
        };
        self.settle(now, &out);
        Ok(out)
    }

    /// Report a gap that outlived the hold
    pub fn poll_gap(&self, now: Instant) -> Option<ResyncReason> {
        let deadline = self.gap_deadline()?;
        if now < deadline || self.pending.is_empty() {
            return None;
        }
        warn!(
            request_id = %self.machine.id(),
            version = self.machine.version(),
            pending = self.pending.len(),
            "Sequence gap not filled in time, resync required"
        );
        Some(ResyncReason::GapTimeout)
    }

    /// Drop buffered events and hold new ones until [`reseed`](Self::reseed)
    pub fn begin_resync(&mut self, reason: ResyncReason) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.gap_since = None;
        self.resyncing = true;
        info!(
            request_id = %self.machine.id(),
            version = self.machine.version(),
            reason = %reason,
            dropped,
            "Resyncing ride request"
        );
        dropped
    }

    /// Replace local state with an authoritative resync snapshot
    pub fn reseed(
        &mut self,
        snapshot: RideRequest,
        now: Instant,
    ) -> Result<Reconciled, ReconcileError> {
        self.check_identity(snapshot.id)?;
        let adoption = self.machine.reseed(snapshot)?;
        self.resyncing = false;
        let mut applied = Vec::new();
        let resync = self.drain(&mut applied);
        let out = Reconciled {
            adoption: Some(adoption),
            applied,
            resync,
        };
        self.settle(now, &out);
        Ok(out)
    }

    /// Adopt the snapshot returned by a REST mutation
    pub fn adopt_confirmed(
        &mut self,
        snapshot: RideRequest,
        now: Instant,
    ) -> Result<Reconciled, ReconcileError> {
        self.check_identity(snapshot.id)?;
        let adoption = self.machine.adopt_confirmed(snapshot)?;
        let mut applied = Vec::new();
        let resync = if self.resyncing {
            None
        } else {
            self.drain(&mut applied)
        };
        let out = Reconciled {
            adoption: Some(adoption),
            applied,
            resync,
        };
        self.settle(now, &out);
        Ok(out)
    }

    /// Whether `transition` fits the current state
    pub fn check(&self, transition: Transition) -> Result<(), TransitionError> {
        self.machine.check(transition)
    }

    /// Apply a transition decided locally, such as an elapsed broadcast window
    pub fn apply_local(&mut self, transition: Transition) -> Result<Applied, TransitionError> {
        self.machine.apply(transition)
    }

    fn park(&mut self, event: ChannelEvent, now: Instant) -> Reconciled {
        let sequence = event.sequence();
        self.pending.insert(sequence, event);

        if self.pending.len() > self.config.buffer_limit {
            warn!(
                request_id = %self.machine.id(),
                version = self.machine.version(),
                limit = self.config.buffer_limit,
                "Event buffer overflow, resync required"
            );
            self.pending.clear();
            self.gap_since = None;
            return Reconciled::resync(ResyncReason::BufferOverflow);
        }

        if !self.resyncing && self.gap_since.is_none() {
            debug!(
                request_id = %self.machine.id(),
                sequence,
                version = self.machine.version(),
                "Holding out-of-order event"
            );
            self.gap_since = Some(now);
        }
        Reconciled::default()
    }

    /// Apply buffered successors while they are contiguous
    fn drain(&mut self, applied: &mut Vec<AppliedEvent>) -> Option<ResyncReason> {
        loop {
            let next = self.machine.version() + 1;
            self.pending = self.pending.split_off(&next);
            let event = self.pending.remove(&next)?;
            if let Err(reason) = self.apply_event(event, applied) {
                return Some(reason);
            }
        }
    }

    fn apply_event(
        &mut self,
        event: ChannelEvent,
        applied: &mut Vec<AppliedEvent>,
    ) -> Result<(), ResyncReason> {
        let sequence = event.sequence();
        match self.machine.apply(event.transition()) {
            Ok(outcome) => {
                if !outcome.changed() {
                    self.machine.acknowledge(sequence);
                }
                applied.push(AppliedEvent { event, outcome });
                Ok(())
            }
            Err(err) => {
                warn!(
                    request_id = %event.request_id(),
                    sequence,
                    kind = %event.kind(),
                    error = %err,
                    "Dropped event that does not fit local state"
                );
                Err(ResyncReason::Diverged)
            }
        }
    }

    fn settle(&mut self, now: Instant, out: &Reconciled) {
        if out.resync.is_some() || self.pending.is_empty() || self.resyncing {
            self.gap_since = None;
        } else if !out.applied.is_empty() || self.gap_since.is_none() {
            // Progress was made but a later gap remains
            self.gap_since = Some(now);
        }
    }

    fn check_identity(&self, id: RideRequestId) -> Result<(), ReconcileError> {
        let expected = self.machine.id();
        if expected.is_unassigned() || expected == id {
            Ok(())
        } else {
            Err(ReconcileError::WrongRequest {
                expected,
                actual: id,
            })
        }
    }
}
