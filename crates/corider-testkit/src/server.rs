//! In-memory dispatch backend
//!
//! [`FakeDispatchServer`] implements both [`RestTransport`] and
//! [`ChannelConnector`] over one shared state, so REST mutations publish
//! channel events to connected clients the way the real backend does: every
//! transition stamps the new version as the event sequence. Ride transitions
//! run through the same [`RideStateMachine`] the client uses.
//!
//! Fault injection covers failed requests, applied-but-lost responses, expired
//! access tokens, revoked refresh tokens, dropped or refused connections and
//! held (reorderable, discardable) event delivery.

use crate::clock::ManualClock;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use corider_core::{
    ChannelEvent, Clock, DriverId, NewRideRequest, OfferKind, Profile, RideOffer, RideRequest,
    RideRequestId, RideRequestState, RideStateMachine, RiderId, Transition, UserId,
    DEFAULT_MAX_REJECTIONS,
};
use corider_transport::{
    ApiErrorBody, ApiRequest, ApiResponse, ChannelConnection, ChannelConnector, ChannelError,
    InboundFrame, Method, RestTransport, TransportError, DRIVER_QUEUE, RIDER_QUEUE,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Lifetime of issued access tokens
pub const ACCESS_TOKEN_TTL_SECS: i64 = 3600;
/// Default broadcast window for new ride requests
pub const DEFAULT_BROADCAST_WINDOW_SECS: i64 = 30;
/// Reported when a response is dropped after the request was applied
pub const LOST_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

pub const BAD_CREDENTIALS_ID: &str = "auth.unauthorized.bad-credentials";
pub const TOKEN_EXPIRED_ID: &str = "auth.unauthorized.token-expired";
pub const REFRESH_INVALID_ID: &str = "auth.unauthorized.refresh-token-invalid";
pub const VERIFICATION_PENDING_ID: &str = "auth.unauthorized.email-verification-pending";
pub const PROFILE_MISSING_ID: &str = "user.validation.profile-not-exists";
pub const ALREADY_ACCEPTED_ID: &str = "ride-request.conflict.already-accepted";
pub const INVALID_STATE_ID: &str = "ride-request.conflict.invalid-state";
pub const BROADCAST_CLOSED_ID: &str = "ride-request.gone.broadcast-closed";

struct Account {
    password: String,
    user_id: UserId,
    profiles: Vec<Profile>,
    verified: bool,
}

struct Grant {
    user_id: UserId,
    profile: Profile,
    expires_at: DateTime<Utc>,
    revoked: bool,
}

#[derive(Debug, Clone, Copy)]
struct Caller {
    user_id: UserId,
    profile: Profile,
}

impl Caller {
    fn driver_id(self) -> DriverId {
        DriverId::new(self.user_id.value())
    }

    fn rider_id(self) -> RiderId {
        RiderId::new(self.user_id.value())
    }
}

struct Connection {
    user_id: UserId,
    profile: Profile,
    subscriptions: HashSet<String>,
    frames: mpsc::UnboundedSender<InboundFrame>,
}

#[derive(Debug, Clone, Copy)]
enum Audience {
    User(UserId),
    Drivers,
}

#[derive(Debug, Clone)]
struct Outgoing {
    queue: &'static str,
    audience: Audience,
    event: ChannelEvent,
}

enum Fault {
    Fail(TransportError),
    LoseResponse,
}

struct ServerState {
    accounts: HashMap<String, Account>,
    grants: HashMap<String, Grant>,
    refresh_tokens: HashMap<String, (UserId, Profile)>,
    issued: u64,
    refresh_calls: u32,
    rides: BTreeMap<RideRequestId, RideRequest>,
    next_ride: u64,
    broadcast_window: ChronoDuration,
    max_rejections: u32,
    latency: Duration,
    faults: Vec<(Method, String, Fault)>,
    requests: Vec<String>,
    connections: HashMap<u64, Connection>,
    next_connection: u64,
    connect_attempts: Vec<String>,
    unreachable: HashSet<String>,
    channel_down: bool,
    holding: bool,
    held: Vec<Outgoing>,
}

/// In-memory dispatch backend shared by every simulated client
#[derive(Clone)]
pub struct FakeDispatchServer {
    state: Arc<Mutex<ServerState>>,
    clock: Arc<ManualClock>,
}

impl std::fmt::Debug for FakeDispatchServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FakeDispatchServer")
            .field("rides", &state.rides.len())
            .field("connections", &state.connections.len())
            .finish_non_exhaustive()
    }
}

impl FakeDispatchServer {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        let state = ServerState {
            accounts: HashMap::new(),
            grants: HashMap::new(),
            refresh_tokens: HashMap::new(),
            issued: 0,
            refresh_calls: 0,
            rides: BTreeMap::new(),
            next_ride: 0,
            broadcast_window: ChronoDuration::seconds(DEFAULT_BROADCAST_WINDOW_SECS),
            max_rejections: DEFAULT_MAX_REJECTIONS,
            latency: Duration::ZERO,
            faults: Vec::new(),
            requests: Vec::new(),
            connections: HashMap::new(),
            next_connection: 0,
            connect_attempts: Vec::new(),
            unreachable: HashSet::new(),
            channel_down: false,
            holding: false,
            held: Vec::new(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            clock,
        }
    }

    pub fn clock(&self) -> Arc<ManualClock> {
        Arc::clone(&self.clock)
    }

    // ========================================================================
    // Setup
    // ========================================================================

    /// Register a verified account holding `profiles`
    pub fn register(&self, email: &str, password: &str, user_id: UserId, profiles: &[Profile]) {
        self.insert_account(email, password, user_id, profiles, true);
    }

    /// Register an account whose email address is not verified yet
    pub fn register_unverified(&self, email: &str, password: &str, user_id: UserId) {
        self.insert_account(email, password, user_id, &[Profile::Rider], false);
    }

    fn insert_account(
        &self,
        email: &str,
        password: &str,
        user_id: UserId,
        profiles: &[Profile],
        verified: bool,
    ) {
        self.state.lock().accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user_id,
                profiles: profiles.to_vec(),
                verified,
            },
        );
    }

    pub fn set_broadcast_window(&self, window: ChronoDuration) {
        self.state.lock().broadcast_window = window;
    }

    pub fn set_max_rejections(&self, max_rejections: u32) {
        self.state.lock().max_rejections = max_rejections.max(1);
    }

    /// Delay every REST exchange by `latency` (tokio time)
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    // ========================================================================
    // Fault injection
    // ========================================================================

    /// Fail the next `method path` exchange without applying it
    pub fn fail_next(&self, method: Method, path: &str, error: TransportError) {
        self.state
            .lock()
            .faults
            .push((method, path.to_string(), Fault::Fail(error)));
    }

    /// Apply the next `method path` exchange, then report a timeout
    pub fn lose_next_response(&self, method: Method, path: &str) {
        self.state
            .lock()
            .faults
            .push((method, path.to_string(), Fault::LoseResponse));
    }

    /// Invalidate every issued access token; refresh tokens stay valid
    pub fn expire_access_tokens(&self) {
        for grant in self.state.lock().grants.values_mut() {
            grant.revoked = true;
        }
    }

    /// Invalidate every refresh token
    pub fn revoke_refresh_tokens(&self) {
        self.state.lock().refresh_tokens.clear();
    }

    /// Close every channel connection
    pub fn drop_connections(&self) {
        self.state.lock().connections.clear();
    }

    /// Refuse (or accept again) every channel connection attempt
    pub fn set_channel_available(&self, available: bool) {
        self.state.lock().channel_down = !available;
    }

    /// Refuse connection attempts at one endpoint path, e.g. `/ws-native`
    pub fn set_endpoint_unreachable(&self, endpoint: &str, unreachable: bool) {
        let mut state = self.state.lock();
        if unreachable {
            state.unreachable.insert(endpoint.to_string());
        } else {
            state.unreachable.remove(endpoint);
        }
    }

    /// Queue channel events instead of delivering them
    pub fn hold_events(&self) {
        self.state.lock().holding = true;
    }

    /// Deliver held events in publication order and stop holding
    pub fn release_events(&self) {
        let mut state = self.state.lock();
        state.holding = false;
        let held = std::mem::take(&mut state.held);
        for outgoing in &held {
            state.deliver(outgoing);
        }
    }

    /// Deliver held events newest first and stop holding
    pub fn release_events_reversed(&self) {
        let mut state = self.state.lock();
        state.holding = false;
        let held = std::mem::take(&mut state.held);
        for outgoing in held.iter().rev() {
            state.deliver(outgoing);
        }
    }

    /// Drop held events and stop holding; returns how many were dropped
    pub fn discard_held_events(&self) -> usize {
        let mut state = self.state.lock();
        state.holding = false;
        std::mem::take(&mut state.held).len()
    }

    // ========================================================================
    // Direct manipulation
    // ========================================================================

    /// Close the broadcast window of `id` server-side
    pub fn expire_ride(&self, id: RideRequestId) -> Result<RideRequest, TransportError> {
        self.state.lock().transition(id, Transition::Expire, None)
    }

    /// Push a direct offer for `id` to one driver
    pub fn send_direct_offer(
        &self,
        id: RideRequestId,
        driver: UserId,
    ) -> Result<RideOffer, TransportError> {
        let mut state = self.state.lock();
        let ride = state.find(id)?;
        let mut offer = offer_of(&ride);
        offer.kind = OfferKind::Direct;
        state.publish(Outgoing {
            queue: DRIVER_QUEUE,
            audience: Audience::User(driver),
            event: ChannelEvent::OfferCreated {
                request_id: id,
                sequence: ride.version,
                offer: offer.clone(),
            },
        });
        Ok(offer)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn ride(&self, id: RideRequestId) -> Option<RideRequest> {
        self.state.lock().rides.get(&id).cloned()
    }

    pub fn rides(&self) -> Vec<RideRequest> {
        self.state.lock().rides.values().cloned().collect()
    }

    pub fn refresh_calls(&self) -> u32 {
        self.state.lock().refresh_calls
    }

    /// Every REST exchange received, formatted `METHOD /path`
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }

    /// How many exchanges matched `METHOD /path` exactly
    pub fn request_count(&self, method: Method, path: &str) -> usize {
        let needle = format!("{method} {path}");
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| **r == needle)
            .count()
    }

    /// Endpoint URLs of every connection attempt, in order
    pub fn connect_attempts(&self) -> Vec<String> {
        self.state.lock().connect_attempts.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Whether some connection of `user` is subscribed to `queue`
    pub fn is_subscribed(&self, user: UserId, queue: &str) -> bool {
        self.state
            .lock()
            .connections
            .values()
            .any(|c| c.user_id == user && c.subscriptions.contains(queue))
    }
}

// ============================================================================
// REST
// ============================================================================

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
    target_profile: Profile,
}

#[derive(Deserialize)]
struct RefreshBody {
    refresh_token: String,
}

#[derive(Deserialize)]
struct SwitchProfileBody {
    target_profile: Profile,
}

#[derive(Deserialize)]
struct AcceptBody {
    expected_version: Option<u64>,
}

#[derive(Deserialize)]
struct RideRef {
    ride_request_id: RideRequestId,
}

type Reply = Result<Value, TransportError>;

fn api_error(status: u16, id: &str, message: &str) -> TransportError {
    TransportError::server(
        status,
        Some(ApiErrorBody {
            id: id.to_string(),
            message: message.to_string(),
        }),
    )
}

fn not_found() -> TransportError {
    api_error(404, "resource.not-found", "no such resource")
}

fn decode<T: DeserializeOwned>(request: &ApiRequest) -> Result<T, TransportError> {
    let body = request.body.clone().unwrap_or(Value::Null);
    serde_json::from_value(body)
        .map_err(|e| api_error(400, "request.validation.malformed", &e.to_string()))
}

fn encode<T: Serialize>(value: &T) -> Reply {
    serde_json::to_value(value).map_err(|e| api_error(500, "server.internal", &e.to_string()))
}

fn parse_id(segment: &str) -> Result<RideRequestId, TransportError> {
    segment.parse().map_err(|_| not_found())
}

fn offer_of(ride: &RideRequest) -> RideOffer {
    RideOffer {
        request_id: ride.id,
        rider_id: ride.rider_id,
        origin: ride.origin.clone(),
        destination: ride.destination.clone(),
        requested_at: ride.requested_at,
        version: ride.version,
        expires_at: ride.broadcast_expires_at.unwrap_or(ride.requested_at),
        kind: OfferKind::Broadcast,
    }
}

fn event_for(ride: &RideRequest, transition: Transition, by: Option<Profile>) -> ChannelEvent {
    let request_id = ride.id;
    let sequence = ride.version;
    match transition {
        Transition::Broadcast => ChannelEvent::OfferCreated {
            request_id,
            sequence,
            offer: offer_of(ride),
        },
        Transition::Accept { driver_id } => ChannelEvent::OfferAccepted {
            request_id,
            sequence,
            driver_id,
        },
        Transition::Reject { driver_id } => ChannelEvent::OfferRejected {
            request_id,
            sequence,
            driver_id,
        },
        Transition::Confirm => ChannelEvent::RideConfirmed {
            request_id,
            sequence,
        },
        Transition::Start => ChannelEvent::RideStarted {
            request_id,
            sequence,
        },
        Transition::Complete => ChannelEvent::RideCompleted {
            request_id,
            sequence,
        },
        Transition::Cancel => ChannelEvent::RideCancelled {
            request_id,
            sequence,
            cancelled_by: by,
        },
        Transition::Expire => ChannelEvent::RideExpired {
            request_id,
            sequence,
        },
    }
}

impl ServerState {
    fn take_fault(&mut self, method: Method, path: &str) -> Option<Fault> {
        let index = self
            .faults
            .iter()
            .position(|(m, p, _)| *m == method && p == path)?;
        Some(self.faults.remove(index).2)
    }

    fn handle(&mut self, request: &ApiRequest, now: DateTime<Utc>) -> Reply {
        let segments: Vec<&str> = request.path.split('/').filter(|s| !s.is_empty()).collect();
        match (request.method, segments.as_slice()) {
            (Method::Post, ["auth", "login"]) => self.login(decode(request)?, now),
            (Method::Post, ["auth", "refresh"]) => self.refresh(decode(request)?, now),
            (Method::Post, ["auth", "logout"]) => {
                self.logout(request);
                Ok(Value::Null)
            }
            (Method::Post, ["users", "me", "switch-profile"]) => {
                let caller = self.caller(request, now)?;
                let body: SwitchProfileBody = decode(request)?;
                self.switch_profile(caller, body.target_profile, now)
            }
            (Method::Post, ["ride-requests"]) => {
                let caller = self.caller_as(request, now, Profile::Rider)?;
                self.create(caller, decode(request)?, now)
            }
            (Method::Get, ["ride-requests", "rider"]) => {
                let caller = self.caller_as(request, now, Profile::Rider)?;
                let mine: Vec<&RideRequest> = self
                    .rides
                    .values()
                    .filter(|r| r.rider_id == caller.rider_id())
                    .collect();
                encode(&mine)
            }
            (Method::Get, ["ride-requests", id]) => {
                self.caller(request, now)?;
                encode(&self.find(parse_id(id)?)?)
            }
            (Method::Put, ["ride-requests", id, "accept"])
            | (Method::Put, ["ride-requests", id, "broadcast", "accept"]) => {
                let caller = self.caller_as(request, now, Profile::Driver)?;
                let expected = match request.body {
                    Some(_) => decode::<AcceptBody>(request)?.expected_version,
                    None => None,
                };
                self.accept(caller, parse_id(id)?, expected, now)
            }
            (Method::Put, ["ride-requests", id, "reject"]) => {
                let caller = self.caller_as(request, now, Profile::Driver)?;
                let ride = self.transition(
                    parse_id(id)?,
                    Transition::Reject {
                        driver_id: caller.driver_id(),
                    },
                    Some(Profile::Driver),
                )?;
                encode(&ride)
            }
            (Method::Put, ["ride-requests", id, "confirm"]) => {
                let caller = self.caller_as(request, now, Profile::Driver)?;
                self.drive(caller, parse_id(id)?, Transition::Confirm)
            }
            (Method::Post, ["rides", "start-ride-request"]) => {
                let caller = self.caller_as(request, now, Profile::Driver)?;
                let body: RideRef = decode(request)?;
                self.drive(caller, body.ride_request_id, Transition::Start)
            }
            (Method::Post, ["rides", "complete-ride-request"]) => {
                let caller = self.caller_as(request, now, Profile::Driver)?;
                let body: RideRef = decode(request)?;
                self.drive(caller, body.ride_request_id, Transition::Complete)
            }
            (Method::Delete, ["ride-requests", id]) => {
                let caller = self.caller(request, now)?;
                self.cancel(caller, parse_id(id)?)
            }
            _ => Err(not_found()),
        }
    }

    fn caller(&self, request: &ApiRequest, now: DateTime<Utc>) -> Result<Caller, TransportError> {
        request
            .bearer
            .as_deref()
            .and_then(|token| self.grants.get(token))
            .filter(|grant| !grant.revoked && grant.expires_at > now)
            .map(|grant| Caller {
                user_id: grant.user_id,
                profile: grant.profile,
            })
            .ok_or_else(|| api_error(401, TOKEN_EXPIRED_ID, "access token expired"))
    }

    fn caller_as(
        &self,
        request: &ApiRequest,
        now: DateTime<Utc>,
        profile: Profile,
    ) -> Result<Caller, TransportError> {
        let caller = self.caller(request, now)?;
        if caller.profile != profile {
            return Err(api_error(403, "auth.forbidden.wrong-profile", "wrong profile"));
        }
        Ok(caller)
    }

    fn issue(&mut self, user_id: UserId, profile: Profile, now: DateTime<Utc>) -> Value {
        self.issued += 1;
        let access_token = format!("access-{user_id}-{}", self.issued);
        let refresh_token = format!("refresh-{user_id}-{}", self.issued);
        self.grants.insert(
            access_token.clone(),
            Grant {
                user_id,
                profile,
                expires_at: now + ChronoDuration::seconds(ACCESS_TOKEN_TTL_SECS),
                revoked: false,
            },
        );
        self.refresh_tokens
            .insert(refresh_token.clone(), (user_id, profile));
        json!({
            "access_token": access_token,
            "refresh_token": refresh_token,
            "expires_in": ACCESS_TOKEN_TTL_SECS,
            "user_id": user_id,
            "active_profile": profile,
        })
    }

    fn login(&mut self, body: LoginBody, now: DateTime<Utc>) -> Reply {
        let account = self
            .accounts
            .get(&body.email)
            .filter(|a| a.password == body.password)
            .ok_or_else(|| api_error(401, BAD_CREDENTIALS_ID, "invalid email or password"))?;
        if !account.verified {
            return Err(api_error(403, VERIFICATION_PENDING_ID, "email not verified"));
        }
        if !account.profiles.contains(&body.target_profile) {
            return Err(api_error(400, PROFILE_MISSING_ID, "profile does not exist"));
        }
        let user_id = account.user_id;
        Ok(self.issue(user_id, body.target_profile, now))
    }

    /// Refresh tokens rotate; each one is usable once
    fn refresh(&mut self, body: RefreshBody, now: DateTime<Utc>) -> Reply {
        self.refresh_calls += 1;
        let (user_id, profile) = self
            .refresh_tokens
            .remove(&body.refresh_token)
            .ok_or_else(|| api_error(401, REFRESH_INVALID_ID, "refresh token invalid"))?;
        Ok(self.issue(user_id, profile, now))
    }

    fn logout(&mut self, request: &ApiRequest) {
        if let Some(token) = request.bearer.as_deref() {
            self.grants.remove(token);
        }
        if let Ok(body) = decode::<RefreshBody>(request) {
            self.refresh_tokens.remove(&body.refresh_token);
        }
    }

    fn switch_profile(&mut self, caller: Caller, target: Profile, now: DateTime<Utc>) -> Reply {
        let holds = self
            .accounts
            .values()
            .any(|a| a.user_id == caller.user_id && a.profiles.contains(&target));
        if !holds {
            return Err(api_error(400, PROFILE_MISSING_ID, "profile does not exist"));
        }
        Ok(self.issue(caller.user_id, target, now))
    }

    fn find(&self, id: RideRequestId) -> Result<RideRequest, TransportError> {
        self.rides.get(&id).cloned().ok_or_else(not_found)
    }

    fn create(&mut self, caller: Caller, new: NewRideRequest, now: DateTime<Utc>) -> Reply {
        let rider_id = caller.rider_id();
        if let Some(existing) = self
            .rides
            .values()
            .find(|r| r.rider_id == rider_id && r.client_reference == Some(new.client_reference))
        {
            return encode(existing);
        }

        self.next_ride += 1;
        let mut draft = RideRequest::draft(&new, rider_id, now);
        draft.id = RideRequestId::new(self.next_ride);
        draft.broadcast_expires_at = Some(now + self.broadcast_window);
        self.rides.insert(draft.id, draft.clone());
        let ride = self.transition(draft.id, Transition::Broadcast, None)?;
        encode(&ride)
    }

    /// Conditional accept: `expected` must match the stored version when given
    fn accept(
        &mut self,
        caller: Caller,
        id: RideRequestId,
        expected: Option<u64>,
        now: DateTime<Utc>,
    ) -> Reply {
        let ride = self.find(id)?;
        match ride.state {
            RideRequestState::Broadcast => {}
            RideRequestState::Expired | RideRequestState::Cancelled | RideRequestState::Rejected => {
                return Err(api_error(410, BROADCAST_CLOSED_ID, "broadcast closed"));
            }
            _ => {
                return Err(api_error(409, ALREADY_ACCEPTED_ID, "ride request already accepted"));
            }
        }
        if expected.is_some_and(|version| version != ride.version) {
            return Err(api_error(409, INVALID_STATE_ID, "ride request changed since offered"));
        }
        if ride.broadcast_elapsed(now) {
            self.transition(id, Transition::Expire, None)?;
            return Err(api_error(410, BROADCAST_CLOSED_ID, "broadcast closed"));
        }
        let ride = self.transition(
            id,
            Transition::Accept {
                driver_id: caller.driver_id(),
            },
            Some(Profile::Driver),
        )?;
        encode(&ride)
    }

    /// Driver-side step on a ride the caller won
    fn drive(&mut self, caller: Caller, id: RideRequestId, transition: Transition) -> Reply {
        let ride = self.find(id)?;
        if ride.driver_id != Some(caller.driver_id()) {
            return Err(api_error(403, "ride-request.forbidden.not-assigned", "not your ride"));
        }
        encode(&self.transition(id, transition, Some(Profile::Driver))?)
    }

    fn cancel(&mut self, caller: Caller, id: RideRequestId) -> Reply {
        let ride = self.find(id)?;
        let owns = match caller.profile {
            Profile::Rider => ride.rider_id == caller.rider_id(),
            Profile::Driver => ride.driver_id == Some(caller.driver_id()),
        };
        if !owns {
            return Err(api_error(403, "ride-request.forbidden.not-owner", "not your ride"));
        }
        encode(&self.transition(id, Transition::Cancel, Some(caller.profile))?)
    }

    fn transition(
        &mut self,
        id: RideRequestId,
        transition: Transition,
        by: Option<Profile>,
    ) -> Result<RideRequest, TransportError> {
        let ride = self.find(id)?;
        let mut machine = RideStateMachine::new(ride, self.max_rejections);
        match machine.apply(transition) {
            Ok(applied) if applied.changed() => {}
            _ => return Err(api_error(409, INVALID_STATE_ID, "transition not allowed")),
        }
        let ride = machine.into_snapshot();
        self.rides.insert(id, ride.clone());

        let event = event_for(&ride, transition, by);
        if !matches!(transition, Transition::Broadcast) {
            self.publish(Outgoing {
                queue: RIDER_QUEUE,
                audience: Audience::User(UserId::new(ride.rider_id.value())),
                event: event.clone(),
            });
        }
        self.publish(Outgoing {
            queue: DRIVER_QUEUE,
            audience: Audience::Drivers,
            event,
        });
        Ok(ride)
    }

    // ========================================================================
    // Channel
    // ========================================================================

    fn publish(&mut self, outgoing: Outgoing) {
        if self.holding {
            self.held.push(outgoing);
        } else {
            self.deliver(&outgoing);
        }
    }

    fn deliver(&mut self, outgoing: &Outgoing) {
        let Ok(body) = serde_json::to_string(&outgoing.event) else {
            return;
        };
        self.connections.retain(|_, conn| {
            let addressed = match outgoing.audience {
                Audience::User(user) => conn.user_id == user,
                Audience::Drivers => conn.profile == Profile::Driver,
            };
            if !addressed || !conn.subscriptions.contains(outgoing.queue) {
                return true;
            }
            conn.frames
                .send(InboundFrame {
                    destination: outgoing.queue.to_string(),
                    body: body.clone(),
                })
                .is_ok()
        });
    }
}

#[async_trait]
impl RestTransport for FakeDispatchServer {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let now = self.clock.now();
        let mut state = self.state.lock();
        state.requests.push(request.to_string());
        match state.take_fault(request.method, &request.path) {
            Some(Fault::Fail(err)) => Err(err),
            Some(Fault::LoseResponse) => {
                let _ = state.handle(&request, now);
                Err(TransportError::timeout(LOST_RESPONSE_TIMEOUT))
            }
            None => state
                .handle(&request, now)
                .map(|body| ApiResponse::new(200, body)),
        }
    }
}

/// Path part of a channel URL, e.g. `/ws-native`
fn endpoint_path(endpoint: &str) -> &str {
    endpoint
        .split_once("://")
        .and_then(|(_, rest)| rest.find('/').map(|i| &rest[i..]))
        .unwrap_or(endpoint)
}

#[async_trait]
impl ChannelConnector for FakeDispatchServer {
    async fn connect(
        &self,
        endpoint: &str,
        bearer: &str,
    ) -> Result<Box<dyn ChannelConnection>, ChannelError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.connect_attempts.push(endpoint.to_string());
        if state.channel_down || state.unreachable.contains(endpoint_path(endpoint)) {
            return Err(ChannelError::connect(endpoint, "connection refused"));
        }

        let (user_id, profile) = state
            .grants
            .get(bearer)
            .filter(|grant| !grant.revoked && grant.expires_at > now)
            .map(|grant| (grant.user_id, grant.profile))
            .ok_or_else(|| ChannelError::rejected("invalid access token"))?;

        let (frames, inbox) = mpsc::unbounded_channel();
        state.next_connection += 1;
        let id = state.next_connection;
        state.connections.insert(
            id,
            Connection {
                user_id,
                profile,
                subscriptions: HashSet::new(),
                frames,
            },
        );
        Ok(Box::new(FakeConnection {
            id,
            inbox,
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeConnection {
    id: u64,
    inbox: mpsc::UnboundedReceiver<InboundFrame>,
    state: Arc<Mutex<ServerState>>,
}

#[async_trait]
impl ChannelConnection for FakeConnection {
    async fn subscribe(&mut self, destination: &str) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        let conn = state
            .connections
            .get_mut(&self.id)
            .ok_or_else(|| ChannelError::lost("connection dropped"))?;
        conn.subscriptions.insert(destination.to_string());
        Ok(())
    }

    async fn unsubscribe(&mut self, destination: &str) -> Result<(), ChannelError> {
        if let Some(conn) = self.state.lock().connections.get_mut(&self.id) {
            conn.subscriptions.remove(destination);
        }
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<InboundFrame>, ChannelError> {
        Ok(self.inbox.recv().await)
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.state.lock().connections.remove(&self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_endpoint_path() {
        assert_eq!(endpoint_path("ws://localhost:8080/ws-native"), "/ws-native");
        assert_eq!(endpoint_path("wss://dispatch.example/ws/websocket"), "/ws/websocket");
        assert_eq!(endpoint_path("/ws"), "/ws");
    }
}
