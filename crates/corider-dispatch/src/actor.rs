//! Ride actor
//!
//! One task per tracked ride request. It owns the ride's
//! [`EventReconciler`], so channel events, REST results, resyncs and the
//! broadcast window all mutate the ride from a single place. Handles talk to
//! it over a command queue and observe it through a watch channel.

use crate::api::{RideApi, RideOp};
use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::registry::RideRegistry;
use crate::tasks::TaskRegistry;
use crate::update::{OfferUpdate, RideUpdate, WithdrawReason};
use chrono::{DateTime, Utc};
use corider_core::{
    ChannelEvent, Clock, DriverId, OfferKind, Profile, RideRequest, RideRequestId,
    RideRequestState, Transition, TransitionError,
};
use corider_sync::{EventReconciler, Reconciled, ResyncReason};
use corider_transport::CallError;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub(crate) enum RideCommand {
    Event(ChannelEvent),
    Resync(ResyncReason),
    Operate {
        op: RideOp,
        reply: oneshot::Sender<Result<RideRequest, DispatchError>>,
    },
    Suspend,
    Resume,
    /// Driver went offline before winning the offer
    Dismiss,
}

/// Cloneable address of one ride actor
#[derive(Debug, Clone)]
pub(crate) struct RideHandle {
    id: RideRequestId,
    commands: mpsc::UnboundedSender<RideCommand>,
    state: watch::Receiver<RideRequest>,
}

impl RideHandle {
    pub(crate) fn new(
        id: RideRequestId,
        commands: mpsc::UnboundedSender<RideCommand>,
        state: watch::Receiver<RideRequest>,
    ) -> Self {
        Self {
            id,
            commands,
            state,
        }
    }

    /// Handle for a ride that was already terminal when tracking began.
    ///
    /// No actor runs behind it: the update stream yields the snapshot once
    /// and ends, and every operation fails against the terminal state.
    pub(crate) fn settled(ride: RideRequest) -> (Self, mpsc::UnboundedReceiver<RideUpdate>) {
        let (commands, _) = mpsc::unbounded_channel();
        let (_, state) = watch::channel(ride.clone());
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let _ = updates_tx.send(RideUpdate::Changed(ride.clone()));
        (Self::new(ride.id, commands, state), updates_rx)
    }

    pub(crate) fn id(&self) -> RideRequestId {
        self.id
    }

    pub(crate) fn send(&self, command: RideCommand) -> Result<(), DispatchError> {
        self.commands.send(command).map_err(|_| DispatchError::Closed)
    }

    pub(crate) fn snapshot(&self) -> RideRequest {
        self.state.borrow().clone()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<RideRequest> {
        self.state.clone()
    }

    /// Run `op` on the actor and wait for the confirmed result
    pub(crate) async fn operate(&self, op: RideOp) -> Result<RideRequest, DispatchError> {
        let (reply, response) = oneshot::channel();
        let sent = self.send(RideCommand::Operate { op, reply });
        match sent {
            Ok(()) => response.await.unwrap_or_else(|_| Err(self.finished(op))),
            Err(_) => Err(self.finished(op)),
        }
    }

    /// Error for an operation on a ride whose actor has stopped
    fn finished(&self, op: RideOp) -> DispatchError {
        let state = self.state.borrow().state;
        if state.is_terminal() {
            TransitionError::invalid(self.id, state, op.name()).into()
        } else {
            DispatchError::Closed
        }
    }
}

impl std::fmt::Debug for RideCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Event(event) => f.debug_tuple("Event").field(event).finish(),
            Self::Resync(reason) => f.debug_tuple("Resync").field(reason).finish(),
            Self::Operate { op, .. } => f.debug_struct("Operate").field("op", op).finish(),
            Self::Suspend => f.write_str("Suspend"),
            Self::Resume => f.write_str("Resume"),
            Self::Dismiss => f.write_str("Dismiss"),
        }
    }
}

/// Who the local user is on this ride
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Rider,
    Driver {
        me: DriverId,
        kind: OfferKind,
        /// Set once the ride is assigned to this driver
        won: bool,
    },
}

impl Role {
    fn profile(self) -> Profile {
        match self {
            Self::Rider => Profile::Rider,
            Self::Driver { .. } => Profile::Driver,
        }
    }
}

/// Everything an actor shares with the coordinator
#[derive(Debug, Clone)]
pub(crate) struct RideContext {
    pub(crate) api: RideApi,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: DispatchConfig,
    pub(crate) registry: Arc<RideRegistry>,
    pub(crate) tasks: Weak<TaskRegistry>,
}

impl RideContext {
    /// Spawn and register the actor for a reconciled ride
    pub(crate) fn launch(
        &self,
        reconciler: EventReconciler,
        role: Role,
    ) -> Result<(RideHandle, mpsc::UnboundedReceiver<RideUpdate>), DispatchError> {
        let tasks = self.tasks.upgrade().ok_or(DispatchError::Closed)?;
        let id = reconciler.id();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(reconciler.snapshot().clone());
        let handle = RideHandle::new(id, commands_tx, state_rx);

        // Parked events queue up ahead of anything routed after this point
        let launch = self
            .registry
            .register(role.profile(), handle.clone(), Instant::now());

        let actor = RideActor {
            reconciler,
            role,
            launch,
            context: self.clone(),
            commands: commands_rx,
            updates: updates_tx,
            state: state_tx,
            suspended: false,
            declined: false,
            deferred: None,
            retry_at: None,
            window: Window::default(),
            done: false,
        };
        if !tasks.spawn(actor.run()) {
            self.registry.finish(id, launch, Instant::now());
            return Err(DispatchError::Closed);
        }
        Ok((handle, updates_rx))
    }
}

#[derive(Debug, Default)]
struct Window {
    /// Expiry the deadline was computed for
    armed_for: Option<DateTime<Utc>>,
    deadline: Option<Instant>,
}

struct RideActor {
    reconciler: EventReconciler,
    role: Role,
    launch: u64,
    context: RideContext,
    commands: mpsc::UnboundedReceiver<RideCommand>,
    updates: mpsc::UnboundedSender<RideUpdate>,
    state: watch::Sender<RideRequest>,
    suspended: bool,
    /// Driver declined; the offer leaves the feed silently
    declined: bool,
    /// Resync postponed by a suspension or a failed fetch
    deferred: Option<ResyncReason>,
    retry_at: Option<Instant>,
    window: Window,
    done: bool,
}

impl RideActor {
    async fn run(mut self) {
        let id = self.reconciler.id();
        debug!(request_id = %id, role = ?self.role, "Ride actor started");

        while !self.done {
            self.arm_window();
            let gap = self.reconciler.gap_deadline();
            let retry = self.retry_at;
            let window = self.window.deadline;

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                () = sleep_until_opt(gap) => {
                    if let Some(reason) = self.reconciler.poll_gap(Instant::now()) {
                        self.resync(reason).await;
                    }
                }
                () = sleep_until_opt(retry) => {
                    self.retry_at = None;
                    if let Some(reason) = self.deferred.take() {
                        self.resync(reason).await;
                    }
                }
                () = sleep_until_opt(window) => {
                    self.window.deadline = None;
                    self.check_window().await;
                }
                () = self.updates.closed() => {
                    debug!(request_id = %id, "Ride handle dropped");
                    break;
                }
            }
        }

        self.context.registry.finish(id, self.launch, Instant::now());
        debug!(request_id = %id, state = %self.reconciler.snapshot().state, "Ride actor stopped");
    }

    async fn handle(&mut self, command: RideCommand) {
        match command {
            RideCommand::Event(event) => {
                match self.reconciler.ingest(event, Instant::now()) {
                    Ok(out) => {
                        if let Some(reason) = self.absorb(out) {
                            self.resync(reason).await;
                        }
                    }
                    Err(err) => warn!(error = %err, "Dropped misrouted event"),
                }
            }
            RideCommand::Resync(reason) => self.resync(reason).await,
            RideCommand::Operate { op, reply } => {
                let result = self.operate(op).await;
                let _ = reply.send(result);
            }
            RideCommand::Suspend => self.suspend(),
            RideCommand::Resume => self.resume().await,
            RideCommand::Dismiss => {
                debug!(request_id = %self.reconciler.id(), "Offer dismissed");
                self.done = true;
            }
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    async fn operate(&mut self, op: RideOp) -> Result<RideRequest, DispatchError> {
        if self.suspended {
            return Err(DispatchError::RequiresLogin);
        }
        let before = self.reconciler.snapshot().clone();
        let request_id = before.id;

        if op == RideOp::Accept {
            if before.driver_id.is_some() && before.driver_id == self.me() {
                return Ok(before);
            }
            if before.driver_id.is_some() {
                return Err(DispatchError::AlreadyTaken { request_id });
            }
            if before.broadcast_elapsed(self.context.clock.now()) {
                return Err(DispatchError::OfferExpired { request_id });
            }
        }

        let transition = match (op, self.me()) {
            (RideOp::Accept, Some(driver_id)) => Transition::Accept { driver_id },
            (RideOp::Reject, Some(driver_id)) => Transition::Reject { driver_id },
            (RideOp::Accept | RideOp::Reject, None) => {
                return Err(TransitionError::invalid(request_id, before.state, op.name()).into())
            }
            (RideOp::Confirm, _) => Transition::Confirm,
            (RideOp::Start, _) => Transition::Start,
            (RideOp::Complete, _) => Transition::Complete,
            (RideOp::Cancel, _) => Transition::Cancel,
        };
        self.reconciler.check(transition)?;

        debug!(request_id = %request_id, op = %op, version = before.version, "Sending ride operation");
        match self
            .context
            .api
            .perform(op, request_id, before.version, self.kind())
            .await
        {
            Ok(snapshot) => {
                if op == RideOp::Reject {
                    self.declined = true;
                }
                self.adopt(snapshot).await;
                if op == RideOp::Reject {
                    self.done = true;
                }
                info!(
                    request_id = %request_id,
                    op = %op,
                    state = %self.reconciler.snapshot().state,
                    version = self.reconciler.version(),
                    "Ride operation confirmed"
                );
                Ok(self.reconciler.snapshot().clone())
            }
            Err(err) => self.recover(op, &before, err).await,
        }
    }

    /// Classify a failed operation, resyncing when its outcome is unknown
    async fn recover(
        &mut self,
        op: RideOp,
        before: &RideRequest,
        err: CallError,
    ) -> Result<RideRequest, DispatchError> {
        let request_id = before.id;

        if matches!(err, CallError::RequiresLogin) {
            self.suspend();
            return Err(DispatchError::RequiresLogin);
        }

        if err.is_timeout() {
            warn!(request_id = %request_id, op = %op, "Ride operation timed out, checking outcome");
            if op == RideOp::Reject {
                self.declined = true;
            }
            self.resync(ResyncReason::UnknownOutcome).await;
            let after = self.reconciler.snapshot().clone();
            if took_effect(op, before, &after, self.me()) {
                info!(request_id = %request_id, op = %op, "Ride operation took effect despite timeout");
                if op == RideOp::Reject {
                    self.done = true;
                }
                return Ok(after);
            }
            self.declined = false;
            if op == RideOp::Accept {
                if after.driver_id.is_some() {
                    return Err(DispatchError::AlreadyTaken { request_id });
                }
                if after.state.is_terminal() {
                    return Err(DispatchError::OfferExpired { request_id });
                }
            }
            return Err(err.into());
        }

        match (op, err.status()) {
            (RideOp::Accept, Some(409)) => {
                info!(request_id = %request_id, "Offer taken by another driver");
                Err(DispatchError::AlreadyTaken { request_id })
            }
            (RideOp::Accept, Some(410)) => {
                info!(request_id = %request_id, "Offer closed before accept");
                self.resync(ResyncReason::WindowElapsed).await;
                Err(DispatchError::OfferExpired { request_id })
            }
            _ => {
                warn!(request_id = %request_id, op = %op, error = %err, "Ride operation failed");
                Err(err.into())
            }
        }
    }

    /// Adopt the snapshot a REST mutation returned
    async fn adopt(&mut self, snapshot: RideRequest) {
        match self.reconciler.adopt_confirmed(snapshot, Instant::now()) {
            Ok(out) => {
                if let Some(reason) = self.absorb(out) {
                    self.resync(reason).await;
                }
            }
            Err(err) => {
                warn!(error = %err, "Confirmed snapshot does not fit local state");
                self.resync(ResyncReason::Diverged).await;
            }
        }
    }

    // ========================================================================
    // Resync
    // ========================================================================

    /// Fetch authoritative state and reseed until no further resync is asked
    async fn resync(&mut self, reason: ResyncReason) {
        let id = self.reconciler.id();
        let mut reason = reason;
        loop {
            self.reconciler.begin_resync(reason);
            if self.suspended {
                self.deferred = Some(reason);
                return;
            }
            match self.context.api.get(id).await {
                Ok(snapshot) => match self.reseed(snapshot) {
                    Some(next) => reason = next,
                    None => {
                        self.retry_at = None;
                        return;
                    }
                },
                Err(CallError::RequiresLogin) => {
                    self.suspend();
                    self.deferred = Some(reason);
                    return;
                }
                Err(err) => {
                    let retry = self.context.config.resync_retry();
                    warn!(
                        request_id = %id,
                        reason = %reason,
                        error = %err,
                        retry_ms = u64::try_from(retry.as_millis()).unwrap_or(u64::MAX),
                        "Resync fetch failed"
                    );
                    self.deferred = Some(reason);
                    self.retry_at = Some(Instant::now() + retry);
                    return;
                }
            }
        }
    }

    fn reseed(&mut self, snapshot: RideRequest) -> Option<ResyncReason> {
        match self.reconciler.reseed(snapshot, Instant::now()) {
            Ok(out) => self.absorb(out),
            Err(err) => {
                warn!(error = %err, "Resync snapshot rejected");
                None
            }
        }
    }

    /// Publish a reconciliation result; returns a follow-up resync
    fn absorb(&mut self, out: Reconciled) -> Option<ResyncReason> {
        if out.changed() {
            self.emit();
        }
        out.resync
    }

    // ========================================================================
    // Broadcast window
    // ========================================================================

    fn arm_window(&mut self) {
        let snapshot = self.reconciler.snapshot();
        let expires_at = match (snapshot.state, snapshot.broadcast_expires_at) {
            (RideRequestState::Broadcast, Some(at)) => at,
            _ => {
                self.window = Window::default();
                return;
            }
        };
        if self.window.armed_for == Some(expires_at) {
            return;
        }
        let remaining = (expires_at - self.context.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.window = Window {
            armed_for: Some(expires_at),
            deadline: Some(Instant::now() + remaining),
        };
    }

    /// Expire locally unless the server moved the ride on
    async fn check_window(&mut self) {
        let local = self.reconciler.snapshot().clone();
        if local.state != RideRequestState::Broadcast || self.suspended {
            return;
        }
        if !local.broadcast_elapsed(self.context.clock.now()) {
            // Clock moved back; re-arm from the current reading
            self.window = Window::default();
            return;
        }

        match self.context.api.get(local.id).await {
            Ok(remote)
                if remote.state == RideRequestState::Broadcast
                    && remote.version == local.version =>
            {
                match self.reconciler.apply_local(Transition::Expire) {
                    Ok(_) => {
                        info!(request_id = %local.id, version = self.reconciler.version(), "Broadcast window elapsed");
                        self.emit();
                    }
                    Err(err) => warn!(error = %err, "Could not expire ride locally"),
                }
            }
            Ok(remote) => {
                self.reconciler.begin_resync(ResyncReason::WindowElapsed);
                if let Some(next) = self.reseed(remote) {
                    self.resync(next).await;
                }
            }
            Err(CallError::RequiresLogin) => self.suspend(),
            Err(err) => {
                warn!(request_id = %local.id, error = %err, "Broadcast window check failed");
                self.deferred = Some(ResyncReason::WindowElapsed);
                self.retry_at = Some(Instant::now() + self.context.config.resync_retry());
            }
        }
    }

    // ========================================================================
    // Session
    // ========================================================================

    fn suspend(&mut self) {
        if self.suspended {
            return;
        }
        self.suspended = true;
        self.retry_at = None;
        info!(request_id = %self.reconciler.id(), "Ride suspended until login");
        self.notify(RideUpdate::Suspended);
    }

    async fn resume(&mut self) {
        if !self.suspended {
            return;
        }
        self.suspended = false;
        self.deferred = None;
        self.window = Window::default();
        self.resync(ResyncReason::Resumed).await;
        info!(request_id = %self.reconciler.id(), version = self.reconciler.version(), "Ride resumed");
        self.notify(RideUpdate::Resumed);
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    fn emit(&mut self) {
        let snapshot = self.reconciler.snapshot().clone();
        self.state.send_replace(snapshot.clone());
        debug!(
            request_id = %snapshot.id,
            state = %snapshot.state,
            version = snapshot.version,
            "Ride updated"
        );

        let mut withdrawn = None;
        if let Role::Driver { me, won, .. } = &mut self.role {
            if snapshot.driver_id == Some(*me) {
                *won = true;
            }
            if !*won && !self.declined {
                withdrawn = withdrawal(snapshot.state);
            }
        }
        if let Some(reason) = withdrawn {
            info!(request_id = %snapshot.id, reason = ?reason, "Offer withdrawn");
            self.context.registry.notify_feed(OfferUpdate::Withdrawn {
                request_id: snapshot.id,
                reason,
            });
            self.done = true;
        }

        let terminal = snapshot.state.is_terminal();
        self.notify(RideUpdate::Changed(snapshot));
        if terminal {
            self.done = true;
        }
    }

    /// Send to the update stream of a ride the user takes part in
    fn notify(&self, update: RideUpdate) {
        let participant = match self.role {
            Role::Rider => true,
            Role::Driver { won, .. } => won,
        };
        if participant {
            let _ = self.updates.send(update);
        }
    }

    fn me(&self) -> Option<DriverId> {
        match self.role {
            Role::Rider => None,
            Role::Driver { me, .. } => Some(me),
        }
    }

    fn kind(&self) -> OfferKind {
        match self.role {
            Role::Rider => OfferKind::Broadcast,
            Role::Driver { kind, .. } => kind,
        }
    }
}

/// Why a ride left the feed of a driver who never won it
fn withdrawal(state: RideRequestState) -> Option<WithdrawReason> {
    use RideRequestState as S;
    match state {
        S::Created | S::Broadcast => None,
        S::Expired => Some(WithdrawReason::Expired),
        S::Cancelled => Some(WithdrawReason::Cancelled),
        S::Rejected => Some(WithdrawReason::Rejected),
        S::Accepted | S::Confirmed | S::Ongoing | S::Completed => Some(WithdrawReason::TakenByOther),
    }
}

/// Whether authoritative state shows `op` landed despite a lost response
fn took_effect(
    op: RideOp,
    before: &RideRequest,
    after: &RideRequest,
    me: Option<DriverId>,
) -> bool {
    use RideRequestState as S;
    if after.version <= before.version {
        return false;
    }
    match op {
        RideOp::Accept => me.is_some() && after.driver_id == me,
        RideOp::Reject => after.rejections > before.rejections || after.state == S::Rejected,
        RideOp::Confirm => matches!(after.state, S::Confirmed | S::Ongoing | S::Completed),
        RideOp::Start => matches!(after.state, S::Ongoing | S::Completed),
        RideOp::Complete => after.state == S::Completed,
        RideOp::Cancel => after.state == S::Cancelled,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
