//! Dispatch coordinator
//!
//! Public face of the crate. Riders request and track rides; drivers go
//! online, receive offers, and accept or decline them. Queue pumps route
//! channel events into the ride registry, and a session watcher suspends
//! every ride when the session needs a new login and resumes them after.

use crate::actor::{RideCommand, RideContext, RideHandle, Role};
use crate::api::{RideApi, RideOp};
use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::registry::{RideRegistry, Route};
use crate::ride::{DriverFeed, DriverRide, RiderRide};
use crate::tasks::TaskRegistry;
use crate::update::OfferUpdate;
use corider_core::{
    ChannelEvent, Clock, DriverId, NewRideRequest, Profile, RideOffer, RideRequest,
    RideRequestId, RideStateMachine, RiderId, SessionStatus, UserId,
};
use corider_sync::{EventReconciler, ResyncReason};
use corider_transport::{CallError, ChannelMessage, Subscription, TransportAdapter};
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Which queue a pump drains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Rider,
    Driver(DriverId),
}

impl Lane {
    fn profile(self) -> Profile {
        match self {
            Self::Rider => Profile::Rider,
            Self::Driver(_) => Profile::Driver,
        }
    }
}

/// Rider and driver ride flows over one transport adapter
pub struct DispatchCoordinator {
    context: RideContext,
    tasks: Arc<TaskRegistry>,
    transport: TransportAdapter,
    session: watch::Receiver<SessionStatus>,
    rider_pump: Mutex<bool>,
    /// Stops the driver queue pump when taken or replaced
    driver_pump: Mutex<Option<oneshot::Sender<()>>>,
}

impl std::fmt::Debug for DispatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchCoordinator")
            .field("rides", &self.context.registry.len())
            .field("parked", &self.context.registry.parked())
            .field("session", &*self.session.borrow())
            .field("config", &self.context.config)
            .finish_non_exhaustive()
    }
}

impl DispatchCoordinator {
    /// Build the coordinator and spawn its session watcher on the current runtime
    pub fn new(
        transport: TransportAdapter,
        session: watch::Receiver<SessionStatus>,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
    ) -> Self {
        let tasks = Arc::new(TaskRegistry::new());
        let registry = Arc::new(RideRegistry::new(
            config.orphan_limit,
            config.orphan_ttl(),
            config.finished_retention(),
        ));
        let context = RideContext {
            api: RideApi::new(transport.clone()),
            clock,
            config,
            registry: Arc::clone(&registry),
            tasks: Arc::downgrade(&tasks),
        };
        tasks.spawn(watch_session(registry, session.clone()));

        Self {
            context,
            tasks,
            transport,
            session,
            rider_pump: Mutex::new(false),
            driver_pump: Mutex::new(None),
        }
    }

    // ========================================================================
    // Rider
    // ========================================================================

    /// Create a ride request and track it until it terminates.
    ///
    /// A create whose response was lost is recovered by looking the request
    /// up through its client reference.
    pub async fn request_ride(&self, new: NewRideRequest) -> Result<RiderRide, DispatchError> {
        let user_id = self.require(Profile::Rider)?;
        self.ensure_rider_pump()?;

        let created = match self.context.api.create(&new).await {
            Ok(ride) => ride,
            Err(err) if err.is_timeout() => self.recover_create(&new, err).await?,
            Err(err) => return Err(err.into()),
        };
        info!(
            request_id = %created.id,
            version = created.version,
            expires_at = ?created.broadcast_expires_at,
            "Ride requested"
        );

        let draft = RideRequest::draft(
            &new,
            RiderId::new(user_id.value()),
            self.context.clock.now(),
        );
        let mut reconciler = self.reconciler_for(draft);
        if let Err(err) = reconciler.adopt_confirmed(created.clone(), Instant::now()) {
            warn!(error = %err, "Created ride does not follow its draft, tracking server state");
            reconciler = self.reconciler_for(created);
        }
        let (handle, updates) = self.context.launch(reconciler, Role::Rider)?;
        Ok(RiderRide::new(handle, updates))
    }

    /// Resume tracking a ride the rider requested earlier
    pub async fn track_ride(&self, request_id: RideRequestId) -> Result<RiderRide, DispatchError> {
        self.require(Profile::Rider)?;
        self.ensure_rider_pump()?;
        let ride = self.context.api.get(request_id).await?;
        if ride.state.is_terminal() {
            debug!(request_id = %request_id, state = %ride.state, "Tracking finished ride");
            self.context.registry.retire(request_id, Instant::now());
            let (handle, updates) = RideHandle::settled(ride);
            return Ok(RiderRide::new(handle, updates));
        }
        let (handle, updates) = self
            .context
            .launch(self.reconciler_for(ride), Role::Rider)?;
        Ok(RiderRide::new(handle, updates))
    }

    /// Every request of the logged-in rider, as the server has them
    pub async fn my_rides(&self) -> Result<Vec<RideRequest>, DispatchError> {
        self.require(Profile::Rider)?;
        Ok(self.context.api.mine().await?)
    }

    async fn recover_create(
        &self,
        new: &NewRideRequest,
        err: CallError,
    ) -> Result<RideRequest, DispatchError> {
        warn!(
            client_reference = %new.client_reference,
            "Ride request timed out, checking whether it was created"
        );
        let mine = self.context.api.mine().await?;
        match mine
            .into_iter()
            .find(|ride| ride.client_reference == Some(new.client_reference))
        {
            Some(ride) => {
                info!(request_id = %ride.id, "Recovered ride request after timeout");
                Ok(ride)
            }
            None => Err(err.into()),
        }
    }

    fn ensure_rider_pump(&self) -> Result<(), DispatchError> {
        let mut started = self.rider_pump.lock();
        if *started {
            return Ok(());
        }
        let subscription = self.transport.subscribe(self.transport.rider_queue())?;
        if !self
            .tasks
            .spawn(pump(self.context.clone(), subscription, Lane::Rider, None))
        {
            return Err(DispatchError::Closed);
        }
        *started = true;
        Ok(())
    }

    // ========================================================================
    // Driver
    // ========================================================================

    /// Subscribe to the driver queue and open the offer feed.
    ///
    /// Going online again replaces the previous feed.
    pub fn go_online(&self) -> Result<DriverFeed, DispatchError> {
        let user_id = self.require(Profile::Driver)?;
        let me = DriverId::new(user_id.value());
        let subscription = self.transport.subscribe(self.transport.driver_queue())?;

        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        self.context.registry.set_feed(Some(feed_tx));
        if let Some(previous) = self.driver_pump.lock().replace(stop_tx) {
            let _ = previous.send(());
        }
        if !self.tasks.spawn(pump(
            self.context.clone(),
            subscription,
            Lane::Driver(me),
            Some(stop_rx),
        )) {
            return Err(DispatchError::Closed);
        }
        info!(driver_id = %me, "Driver online");
        Ok(DriverFeed::new(feed_rx))
    }

    /// Stop receiving offers; rides already won keep running
    pub fn go_offline(&self) {
        if let Some(stop) = self.driver_pump.lock().take() {
            let _ = stop.send(());
        }
        self.context.registry.set_feed(None);
        let dismissed = self.context.registry.dismiss_offers();
        info!(dismissed, "Driver offline");
    }

    /// Accept an offer from the feed.
    ///
    /// Fails with [`DispatchError::AlreadyTaken`] when another driver won and
    /// [`DispatchError::OfferExpired`] when the broadcast window closed.
    pub async fn accept(&self, request_id: RideRequestId) -> Result<DriverRide, DispatchError> {
        self.require(Profile::Driver)?;
        let handle = self
            .context
            .registry
            .handle(request_id)
            .ok_or(DispatchError::UnknownRide { request_id })?;
        handle.operate(RideOp::Accept).await?;

        let updates = self
            .context
            .registry
            .take_updates(request_id)
            .unwrap_or_else(|| mpsc::unbounded_channel().1);
        Ok(DriverRide::new(handle, updates))
    }

    /// Decline an offer; it leaves the feed without a withdrawal notice
    pub async fn reject(&self, request_id: RideRequestId) -> Result<(), DispatchError> {
        self.require(Profile::Driver)?;
        let handle = self
            .context
            .registry
            .handle(request_id)
            .ok_or(DispatchError::UnknownRide { request_id })?;
        handle.operate(RideOp::Reject).await?;
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Local snapshot of a tracked ride or offer
    pub fn ride(&self, request_id: RideRequestId) -> Option<RideRequest> {
        self.context.registry.snapshot(request_id)
    }

    /// Number of rides and offers being tracked
    pub fn tracked(&self) -> usize {
        self.context.registry.len()
    }

    /// Resync every suspended ride; normally driven by the session watcher
    pub fn resume(&self) {
        let resumed = self
            .context
            .registry
            .broadcast(None, || RideCommand::Resume);
        debug!(resumed, "Resuming rides");
    }

    /// Stop every pump and actor; ride streams end and the feed closes
    pub fn shutdown(&self) {
        let rides = self.context.registry.len();
        self.driver_pump.lock().take();
        self.tasks.shutdown();
        self.context.registry.clear();
        info!(rides, "Dispatch coordinator shut down");
    }

    fn require(&self, required: Profile) -> Result<UserId, DispatchError> {
        if self.tasks.is_shut_down() {
            return Err(DispatchError::Closed);
        }
        match *self.session.borrow() {
            SessionStatus::Active { profile, user_id } if profile == required => Ok(user_id),
            SessionStatus::Active { profile, .. } => Err(DispatchError::WrongProfile {
                required,
                active: profile,
            }),
            SessionStatus::LoggedOut | SessionStatus::RequiresLogin => {
                Err(DispatchError::RequiresLogin)
            }
        }
    }

    fn reconciler_for(&self, ride: RideRequest) -> EventReconciler {
        reconciler_for(&self.context, ride)
    }
}

fn reconciler_for(context: &RideContext, ride: RideRequest) -> EventReconciler {
    EventReconciler::new(
        RideStateMachine::new(ride, context.config.max_rejections),
        context.config.reconciler.clone(),
    )
}

/// Drain one queue subscription into the registry
async fn pump(
    context: RideContext,
    mut subscription: Subscription,
    lane: Lane,
    mut stop: Option<oneshot::Receiver<()>>,
) {
    debug!(destination = subscription.destination(), lane = ?lane, "Queue pump started");
    loop {
        let message = match stop.as_mut() {
            Some(stop) => tokio::select! {
                message = subscription.next() => message,
                _ = stop => None,
            },
            None => subscription.next().await,
        };
        let Some(message) = message else {
            break;
        };
        match message {
            ChannelMessage::Resync => {
                let rides = context.registry.broadcast(Some(lane.profile()), || {
                    RideCommand::Resync(ResyncReason::Reconnected)
                });
                info!(destination = subscription.destination(), rides, "Channel resync");
            }
            ChannelMessage::Event(event) => route(&context, event, lane),
        }
    }
    debug!(destination = subscription.destination(), "Queue pump stopped");
}

fn route(context: &RideContext, event: ChannelEvent, lane: Lane) {
    let request_id = event.request_id();
    if let Lane::Driver(me) = lane {
        if !context.registry.contains(request_id) {
            // Other drivers' rides are not tracked unless an offer opens them
            if let Some(offer) = event.offer() {
                if !context.registry.is_finished(request_id, Instant::now()) {
                    open_offer(context, offer.clone(), me);
                }
            }
            return;
        }
    }

    match context.registry.route(event, Instant::now()) {
        Route::Delivered => {}
        Route::Parked => debug!(request_id = %request_id, "Parked event for untracked ride"),
        Route::Dropped => debug!(request_id = %request_id, "Dropped event for finished ride"),
    }
}

fn open_offer(context: &RideContext, offer: RideOffer, me: DriverId) {
    let request_id = offer.request_id;
    if offer.is_expired_at(context.clock.now()) {
        debug!(request_id = %request_id, "Ignored expired offer");
        return;
    }
    let role = Role::Driver {
        me,
        kind: offer.kind,
        won: false,
    };
    let reconciler = reconciler_for(context, offer.to_request());
    context
        .registry
        .notify_feed(OfferUpdate::Offered(offer.clone()));

    match context.launch(reconciler, role) {
        Ok((_, updates)) => {
            context.registry.stash_updates(request_id, updates);
            info!(
                request_id = %request_id,
                kind = ?offer.kind,
                expires_at = %offer.expires_at,
                "Offer received"
            );
        }
        Err(err) => debug!(request_id = %request_id, error = %err, "Offer not tracked"),
    }
}

/// Suspend rides when the session is lost and resume them after login
async fn watch_session(registry: Arc<RideRegistry>, mut session: watch::Receiver<SessionStatus>) {
    let mut suspended = !matches!(*session.borrow(), SessionStatus::Active { .. });
    while session.changed().await.is_ok() {
        let status = *session.borrow_and_update();
        match status {
            SessionStatus::RequiresLogin | SessionStatus::LoggedOut if !suspended => {
                suspended = true;
                let rides = registry.broadcast(None, || RideCommand::Suspend);
                warn!(rides, status = ?status, "Session lost, suspending rides");
            }
            SessionStatus::Active { .. } if suspended => {
                suspended = false;
                let rides = registry.broadcast(None, || RideCommand::Resume);
                info!(rides, "Session restored, resuming rides");
            }
            _ => {}
        }
    }
}
