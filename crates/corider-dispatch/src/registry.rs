//! Ride registry
//!
//! Routes channel events to ride actors by request id. Events for ids that
//! have no actor yet are parked (bounded, with a time to live) and replayed
//! when the actor registers; events for finished rides are dropped until
//! the finished id ages out of its retention window.

use crate::actor::{RideCommand, RideHandle};
use crate::update::{OfferUpdate, RideUpdate};
use corider_core::{ChannelEvent, Profile, RideRequest, RideRequestId};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Where [`RideRegistry::route`] sent an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    Delivered,
    Parked,
    Dropped,
}

#[derive(Debug)]
struct RideSlot {
    profile: Profile,
    handle: RideHandle,
    /// Update queue of a driver offer, handed out once the offer is won
    stashed: Option<mpsc::UnboundedReceiver<RideUpdate>>,
    /// Launch that owns the slot; a replaced actor must not remove it
    launch: u64,
}

#[derive(Debug)]
struct Parked {
    at: Instant,
    event: ChannelEvent,
}

#[derive(Debug, Default)]
struct RegistryState {
    rides: HashMap<RideRequestId, RideSlot>,
    orphans: VecDeque<Parked>,
    /// Finished ids and when they finished
    finished: HashMap<RideRequestId, Instant>,
    feed: Option<mpsc::UnboundedSender<OfferUpdate>>,
    launches: u64,
}

#[derive(Debug)]
pub(crate) struct RideRegistry {
    state: Mutex<RegistryState>,
    orphan_limit: usize,
    orphan_ttl: Duration,
    finished_ttl: Duration,
}

impl RideRegistry {
    pub(crate) fn new(orphan_limit: usize, orphan_ttl: Duration, finished_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            orphan_limit,
            orphan_ttl,
            finished_ttl,
        }
    }

    /// Register an actor and replay the events parked for it.
    ///
    /// Returns the launch token the actor hands back to [`Self::finish`].
    pub(crate) fn register(&self, profile: Profile, handle: RideHandle, now: Instant) -> u64 {
        let id = handle.id();
        let mut state = self.state.lock();
        state.finished.remove(&id);
        self.expire(&mut state, now);
        state.launches += 1;
        let launch = state.launches;

        let mut replayed = 0usize;
        let mut kept = VecDeque::with_capacity(state.orphans.len());
        for parked in state.orphans.drain(..) {
            if parked.event.request_id() == id {
                let _ = handle.send(RideCommand::Event(parked.event));
                replayed += 1;
            } else {
                kept.push_back(parked);
            }
        }
        state.orphans = kept;
        if replayed > 0 {
            debug!(request_id = %id, replayed, "Replayed parked events");
        }

        let slot = RideSlot {
            profile,
            handle,
            stashed: None,
            launch,
        };
        if state.rides.insert(id, slot).is_some() {
            warn!(request_id = %id, "Replaced existing ride actor");
        }
        launch
    }

    pub(crate) fn contains(&self, id: RideRequestId) -> bool {
        self.state.lock().rides.contains_key(&id)
    }

    pub(crate) fn is_finished(&self, id: RideRequestId, now: Instant) -> bool {
        let mut state = self.state.lock();
        self.expire(&mut state, now);
        state.finished.contains_key(&id)
    }

    /// Deliver `event` to its ride's actor, parking it if there is none yet
    pub(crate) fn route(&self, event: ChannelEvent, now: Instant) -> Route {
        let id = event.request_id();
        let mut state = self.state.lock();
        self.expire(&mut state, now);

        if let Some(slot) = state.rides.get(&id) {
            if slot.handle.send(RideCommand::Event(event)).is_ok() {
                return Route::Delivered;
            }
            state.rides.remove(&id);
            state.finished.insert(id, now);
            return Route::Dropped;
        }
        if state.finished.contains_key(&id) {
            return Route::Dropped;
        }

        if state.orphans.len() >= self.orphan_limit {
            if let Some(evicted) = state.orphans.pop_front() {
                debug!(
                    request_id = %evicted.event.request_id(),
                    sequence = evicted.event.sequence(),
                    "Evicted oldest parked event"
                );
            }
        }
        state.orphans.push_back(Parked { at: now, event });
        Route::Parked
    }

    /// Send a command to every actor of `profile`, or to all when `None`
    pub(crate) fn broadcast<F>(&self, profile: Option<Profile>, command: F) -> usize
    where
        F: Fn() -> RideCommand,
    {
        let state = self.state.lock();
        state
            .rides
            .values()
            .filter(|slot| profile.map_or(true, |p| p == slot.profile))
            .filter(|slot| slot.handle.send(command()).is_ok())
            .count()
    }

    pub(crate) fn handle(&self, id: RideRequestId) -> Option<RideHandle> {
        self.state.lock().rides.get(&id).map(|slot| slot.handle.clone())
    }

    /// Local snapshot of a tracked ride
    pub(crate) fn snapshot(&self, id: RideRequestId) -> Option<RideRequest> {
        self.state.lock().rides.get(&id).map(|slot| slot.handle.snapshot())
    }

    /// Keep the update queue of a driver offer until it is won
    pub(crate) fn stash_updates(
        &self,
        id: RideRequestId,
        updates: mpsc::UnboundedReceiver<RideUpdate>,
    ) {
        if let Some(slot) = self.state.lock().rides.get_mut(&id) {
            slot.stashed = Some(updates);
        }
    }

    pub(crate) fn take_updates(&self, id: RideRequestId) -> Option<mpsc::UnboundedReceiver<RideUpdate>> {
        self.state
            .lock()
            .rides
            .get_mut(&id)
            .and_then(|slot| slot.stashed.take())
    }

    /// Stop every offer actor that was never won
    pub(crate) fn dismiss_offers(&self) -> usize {
        let state = self.state.lock();
        state
            .rides
            .values()
            .filter(|slot| slot.stashed.is_some())
            .filter(|slot| slot.handle.send(RideCommand::Dismiss).is_ok())
            .count()
    }

    /// Remove a stopped actor; later events for `id` are dropped.
    ///
    /// An actor whose slot was taken over by a later launch leaves it alone.
    pub(crate) fn finish(&self, id: RideRequestId, launch: u64, now: Instant) {
        let mut state = self.state.lock();
        match state.rides.get(&id) {
            Some(slot) if slot.launch != launch => {
                debug!(request_id = %id, "Replaced ride actor stopped");
            }
            _ => {
                state.rides.remove(&id);
                state.finished.insert(id, now);
            }
        }
    }

    /// Mark a ride finished without ever launching an actor for it
    pub(crate) fn retire(&self, id: RideRequestId, now: Instant) {
        let mut state = self.state.lock();
        if !state.rides.contains_key(&id) {
            state.finished.insert(id, now);
        }
    }

    pub(crate) fn set_feed(&self, feed: Option<mpsc::UnboundedSender<OfferUpdate>>) {
        self.state.lock().feed = feed;
    }

    /// Push an item to the driver feed if one is open
    pub(crate) fn notify_feed(&self, update: OfferUpdate) -> bool {
        let mut state = self.state.lock();
        let Some(feed) = state.feed.as_ref() else {
            return false;
        };
        if feed.send(update).is_ok() {
            return true;
        }
        state.feed = None;
        false
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().rides.len()
    }

    pub(crate) fn parked(&self) -> usize {
        self.state.lock().orphans.len()
    }

    /// Forget every actor and parked event
    pub(crate) fn clear(&self) {
        let mut state = self.state.lock();
        state.rides.clear();
        state.orphans.clear();
        state.feed = None;
    }

    /// Drop parked events and finished ids that outlived their windows
    fn expire(&self, state: &mut RegistryState, now: Instant) {
        let ttl = self.orphan_ttl;
        state
            .orphans
            .retain(|parked| now.saturating_duration_since(parked.at) < ttl);
        let retention = self.finished_ttl;
        state
            .finished
            .retain(|_, at| now.saturating_duration_since(*at) < retention);
    }

    #[cfg(test)]
    fn finished_len(&self) -> usize {
        self.state.lock().finished.len()
    }
}
