//! Ride request state machine
//!
//! The single mutation path for a [`RideRequest`]. Transitions arrive from two
//! directions: channel events (via the reconciler) and REST confirmations
//! (as authoritative snapshots). Both are checked against the lifecycle graph
//!
//! ```text
//! CREATED -> BROADCAST -> ACCEPTED -> CONFIRMED -> ONGOING -> COMPLETED
//!              |  ^  |        |           |
//!              |  |  |        +-----------+--> CANCELLED
//!              |  +--+ re-offer after reject
//!              +--> EXPIRED | REJECTED | CANCELLED
//! ```
//!
//! Every applied step bumps the version by one. Steps that do not fit the
//! graph fail with [`TransitionError::InvalidTransition`] and leave the record
//! untouched.

use crate::errors::TransitionError;
use crate::identifiers::{DriverId, RideRequestId};
use crate::ride::{RideRequest, RideRequestState};
use std::fmt;
use tracing::{debug, warn};

/// Declines allowed before a broadcast request terminates as REJECTED
pub const DEFAULT_MAX_REJECTIONS: u32 = 3;

/// Requested lifecycle step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// Server accepted the create and opened the broadcast
    Broadcast,
    /// A driver won the offer
    Accept {
        /// Driver taking the ride
        driver_id: DriverId,
    },
    /// A driver declined the offer
    Reject {
        /// Driver declining
        driver_id: DriverId,
    },
    /// Winning driver confirmed
    Confirm,
    /// Ride started
    Start,
    /// Ride completed
    Complete,
    /// Rider or driver cancelled
    Cancel,
    /// Broadcast window elapsed
    Expire,
}

impl Transition {
    /// Short name used in logs and errors
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::Accept { .. } => "accept",
            Self::Reject { .. } => "reject",
            Self::Confirm => "confirm",
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
            Self::Expire => "expire",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of [`RideStateMachine::apply`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// State changed
    Transitioned {
        /// State before the step
        from: RideRequestState,
        /// State after the step
        to: RideRequestState,
        /// Version after the step
        version: u64,
    },
    /// A driver declined and the request stays open for another offer
    Reoffered {
        /// Declines so far
        rejections: u32,
        /// Version after the decline
        version: u64,
    },
    /// Accepted as a no-op (a later acceptance for an already won request)
    Ignored {
        /// Why nothing changed
        reason: &'static str,
    },
}

impl Applied {
    /// Whether the record changed
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Ignored { .. })
    }
}

/// Outcome of adopting an authoritative snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Adoption {
    /// Snapshot older than local state; ignored
    Stale,
    /// Snapshot identical to local state
    Unchanged,
    /// Local state replaced
    Adopted {
        /// State before adoption
        from: RideRequestState,
        /// Adopted state
        to: RideRequestState,
        /// Adopted version
        version: u64,
    },
}

impl Adoption {
    /// Whether the record changed
    pub fn changed(&self) -> bool {
        matches!(self, Self::Adopted { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Move(RideRequestState),
    Reoffer,
    Ignore(&'static str),
}

/// Lifecycle guard around one ride request
#[derive(Debug, Clone)]
pub struct RideStateMachine {
    request: RideRequest,
    max_rejections: u32,
}

impl RideStateMachine {
    /// Wrap a record; `max_rejections` of zero is treated as one
    pub fn new(request: RideRequest, max_rejections: u32) -> Self {
        Self {
            request,
            max_rejections: max_rejections.max(1),
        }
    }

    /// Current record
    pub fn snapshot(&self) -> &RideRequest {
        &self.request
    }

    /// Give up the guard and keep the record
    pub fn into_snapshot(self) -> RideRequest {
        self.request
    }

    /// Request identifier
    pub fn id(&self) -> RideRequestId {
        self.request.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> RideRequestState {
        self.request.state
    }

    /// Current version
    pub fn version(&self) -> u64 {
        self.request.version
    }

    /// Validate a transition without applying it
    pub fn check(&self, transition: Transition) -> Result<(), TransitionError> {
        self.step(transition).map(|_| ())
    }

    /// Apply one transition, bumping the version when the record changes
    pub fn apply(&mut self, transition: Transition) -> Result<Applied, TransitionError> {
        let from = self.request.state;
        let step = match self.step(transition) {
            Ok(step) => step,
            Err(err) => {
                warn!(
                    request_id = %self.request.id,
                    state = %from,
                    transition = %transition,
                    version = self.request.version,
                    "Rejected ride request transition"
                );
                return Err(err);
            }
        };

        match step {
            Step::Ignore(reason) => {
                debug!(
                    request_id = %self.request.id,
                    transition = %transition,
                    reason,
                    "Ignored ride request transition"
                );
                Ok(Applied::Ignored { reason })
            }
            Step::Reoffer => {
                self.request.rejections += 1;
                self.request.version += 1;
                Ok(Applied::Reoffered {
                    rejections: self.request.rejections,
                    version: self.request.version,
                })
            }
            Step::Move(to) => {
                match transition {
                    Transition::Accept { driver_id } => self.request.driver_id = Some(driver_id),
                    Transition::Reject { .. } => self.request.rejections += 1,
                    _ => {}
                }
                self.request.state = to;
                self.request.version += 1;
                debug!(
                    request_id = %self.request.id,
                    from = %from,
                    to = %to,
                    version = self.request.version,
                    "Ride request transitioned"
                );
                Ok(Applied::Transitioned {
                    from,
                    to,
                    version: self.request.version,
                })
            }
        }
    }

    /// Raise the version without a state change.
    ///
    /// Used when an event was accepted as a no-op so the next sequence number
    /// does not look like a gap. Never lowers the version.
    pub fn acknowledge(&mut self, version: u64) {
        self.request.version = self.request.version.max(version);
    }

    /// Adopt the snapshot returned by a REST operation.
    ///
    /// Older or equal versions are stale. A snapshot exactly one version ahead
    /// must be one lifecycle step away; larger jumps are adopted outright since
    /// the server already applied the intermediate steps.
    pub fn adopt_confirmed(&mut self, snapshot: RideRequest) -> Result<Adoption, TransitionError> {
        self.check_identity(&snapshot)?;
        if snapshot.version <= self.request.version {
            return Ok(Adoption::Stale);
        }
        if snapshot.version == self.request.version + 1
            && !self.request.state.can_transition_to(snapshot.state)
        {
            warn!(
                request_id = %snapshot.id,
                state = %self.request.state,
                target = %snapshot.state,
                version = snapshot.version,
                "Rejected confirmed snapshot"
            );
            return Err(TransitionError::invalid(
                snapshot.id,
                self.request.state,
                snapshot.state.as_str(),
            ));
        }
        Ok(self.replace(snapshot))
    }

    /// Replace local state with a resync snapshot unless it is older
    pub fn reseed(&mut self, snapshot: RideRequest) -> Result<Adoption, TransitionError> {
        self.check_identity(&snapshot)?;
        if snapshot.version < self.request.version {
            return Ok(Adoption::Stale);
        }
        if snapshot == self.request {
            return Ok(Adoption::Unchanged);
        }
        Ok(self.replace(snapshot))
    }

    fn replace(&mut self, snapshot: RideRequest) -> Adoption {
        let from = self.request.state;
        let to = snapshot.state;
        let version = snapshot.version;
        self.request = snapshot;
        Adoption::Adopted { from, to, version }
    }

    fn check_identity(&self, snapshot: &RideRequest) -> Result<(), TransitionError> {
        if self.request.id.is_unassigned() || self.request.id == snapshot.id {
            Ok(())
        } else {
            Err(TransitionError::SnapshotMismatch {
                expected: self.request.id,
                actual: snapshot.id,
            })
        }
    }

    fn step(&self, transition: Transition) -> Result<Step, TransitionError> {
        use RideRequestState as S;

        let state = self.request.state;
        let step = match (state, transition) {
            (S::Created, Transition::Broadcast) => Step::Move(S::Broadcast),
            (S::Broadcast, Transition::Accept { .. }) => Step::Move(S::Accepted),
            // First confirmed acceptance wins; later ones are no-ops.
            (_, Transition::Accept { .. }) if self.request.driver_id.is_some() => {
                Step::Ignore("ride request already accepted")
            }
            (S::Broadcast, Transition::Reject { .. }) => {
                if self.request.rejections + 1 >= self.max_rejections {
                    Step::Move(S::Rejected)
                } else {
                    Step::Reoffer
                }
            }
            (S::Broadcast, Transition::Expire) => Step::Move(S::Expired),
            (S::Accepted, Transition::Confirm) => Step::Move(S::Confirmed),
            (S::Confirmed, Transition::Start) => Step::Move(S::Ongoing),
            (S::Ongoing, Transition::Complete) => Step::Move(S::Completed),
            (s, Transition::Cancel) if s.is_cancellable() => Step::Move(S::Cancelled),
            _ => {
                return Err(TransitionError::invalid(
                    self.request.id,
                    state,
                    transition.name(),
                ))
            }
        };
        Ok(step)
    }
}
