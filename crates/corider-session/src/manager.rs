//! Session manager
//!
//! Owns the device session and implements [`Authorizer`] for the transport
//! adapter. Token refresh is single-flight: callers serialize on an async
//! mutex and compare the credential generation they failed with against the
//! current one, so only the first caller performs the network exchange.
//! Login, logout and profile switches hold the same mutex, so a refresh in
//! flight can never resurrect or clear a session it did not start from.

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::wire::{
    LoginRequest, RefreshRequest, SwitchProfileRequest, TokenResponse, LOGIN_PATH, LOGOUT_PATH,
    REFRESH_PATH, SWITCH_PROFILE_PATH,
};
use async_trait::async_trait;
use corider_core::{Clock, Profile, Session, SessionStatus};
use corider_transport::{
    ApiRequest, ApiResponse, Authorizer, CallError, Credential, RestTransport, TransportError,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Login, refresh, logout and profile switching for one device
pub struct SessionManager {
    rest: Arc<dyn RestTransport>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    session: RwLock<Option<Session>>,
    refresh_lock: Mutex<()>,
    status: watch::Sender<SessionStatus>,
    /// Last issued credential generation; survives logout so it never repeats
    generation: parking_lot::Mutex<u64>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("status", &*self.status.borrow())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Manager with no session; call [`SessionManager::login`] next
    pub fn new(rest: Arc<dyn RestTransport>, clock: Arc<dyn Clock>, config: SessionConfig) -> Self {
        let (status, _) = watch::channel(SessionStatus::LoggedOut);
        Self {
            rest,
            clock,
            config,
            session: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            status,
            generation: parking_lot::Mutex::new(0),
        }
    }

    /// Log in with email and password as `profile`
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        profile: Profile,
    ) -> Result<Session, SessionError> {
        let request = ApiRequest::post(LOGIN_PATH)
            .json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
                target_profile: profile,
            })
            .map_err(SessionError::from)?;

        let _guard = self.refresh_lock.lock().await;
        let response = self
            .rest
            .send(request)
            .await
            .map_err(|err| SessionError::from_auth_failure(err, profile))?;
        let session = self.install(&response)?;
        info!(user_id = %session.user_id, profile = %session.profile, "Logged in");
        Ok(session)
    }

    /// Restore a previously persisted session
    pub fn restore(&self, mut session: Session) {
        session.generation = self.next_generation();
        let status = SessionStatus::Active {
            profile: session.profile,
            user_id: session.user_id,
        };
        *self.session.write() = Some(session);
        self.status.send_replace(status);
    }

    /// End the session; the server call is best-effort
    pub async fn logout(&self) {
        let _guard = self.refresh_lock.lock().await;
        let Some(session) = self.session.write().take() else {
            return;
        };
        self.status.send_replace(SessionStatus::LoggedOut);

        let request = ApiRequest::post(LOGOUT_PATH)
            .with_bearer(session.access_token.clone())
            .with_body(serde_json::json!({ "refresh_token": session.refresh_token }));
        match self.rest.send(request).await {
            Ok(_) => info!(user_id = %session.user_id, "Logged out"),
            Err(err) => warn!(error = %err, "Logout request failed; session cleared locally"),
        }
    }

    /// Switch the active profile, receiving tokens scoped to it
    pub async fn switch_profile(&self, profile: Profile) -> Result<Session, SessionError> {
        let request = ApiRequest::post(SWITCH_PROFILE_PATH)
            .json(&SwitchProfileRequest {
                target_profile: profile,
            })
            .map_err(SessionError::from)?;

        let mut credential = self.credential().await?;
        let mut recovered = false;
        loop {
            let guard = self.refresh_lock.lock().await;
            if !self.holds(credential.generation) {
                // Logged out or re-issued while we waited for the lock
                return Err(SessionError::RequiresLogin);
            }
            let attempt = request.clone().with_bearer(credential.token.clone());
            match self.rest.send(attempt).await {
                Ok(response) => {
                    let session = self.install(&response)?;
                    info!(user_id = %session.user_id, profile = %profile, "Switched profile");
                    return Ok(session);
                }
                Err(err) if err.is_unauthorized() && !recovered => {
                    drop(guard);
                    recovered = true;
                    credential = self.refresh_after(credential.generation).await?;
                }
                Err(err) => return Err(SessionError::from_auth_failure(err, profile)),
            }
        }
    }

    /// Current session snapshot
    pub fn current(&self) -> Option<Session> {
        self.session.read().clone()
    }

    /// Current status
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Observe status changes
    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Single-flight refresh for callers whose credential was `seen_generation`
    async fn refresh_after(&self, seen_generation: u64) -> Result<Credential, CallError> {
        let _guard = self.refresh_lock.lock().await;

        let Some(current) = self.current() else {
            return Err(CallError::RequiresLogin);
        };
        if current.generation > seen_generation {
            debug!(generation = current.generation, "Credential already refreshed");
            return Ok(credential_of(&current));
        }

        let request = ApiRequest::post(REFRESH_PATH).json(&RefreshRequest {
            refresh_token: current.refresh_token.clone(),
        })?;

        let response = self.rest.send(request).await;
        if !self.holds(current.generation) {
            debug!("Session replaced during refresh, discarding result");
            return match self.current() {
                Some(newer) => Ok(credential_of(&newer)),
                None => Err(CallError::RequiresLogin),
            };
        }
        match response {
            Ok(response) => {
                let session = self.install(&response).map_err(|_| {
                    CallError::decode("refresh response did not carry a token pair")
                })?;
                debug!(generation = session.generation, "Access token refreshed");
                Ok(credential_of(&session))
            }
            Err(err) if refresh_rejected(&err) => {
                warn!(error = %err, "Refresh rejected, login required");
                self.expire();
                Err(CallError::RequiresLogin)
            }
            Err(err) => Err(CallError::Transport(err)),
        }
    }

    fn install(&self, response: &ApiResponse) -> Result<Session, SessionError> {
        let tokens: TokenResponse = response.json()?;
        let expires_in = i64::try_from(tokens.expires_in).unwrap_or(i64::MAX);
        let session = Session {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: self.clock.now() + chrono::Duration::seconds(expires_in),
            profile: tokens.active_profile,
            user_id: tokens.user_id,
            generation: self.next_generation(),
        };
        *self.session.write() = Some(session.clone());
        self.status.send_replace(SessionStatus::Active {
            profile: session.profile,
            user_id: session.user_id,
        });
        Ok(session)
    }

    /// Whether the stored session is still the one issued as `generation`
    fn holds(&self, generation: u64) -> bool {
        self.session
            .read()
            .as_ref()
            .is_some_and(|session| session.generation == generation)
    }

    fn expire(&self) {
        *self.session.write() = None;
        self.status.send_replace(SessionStatus::RequiresLogin);
    }

    fn next_generation(&self) -> u64 {
        let mut generation = self.generation.lock();
        *generation += 1;
        *generation
    }
}

fn credential_of(session: &Session) -> Credential {
    Credential {
        token: session.access_token.clone(),
        generation: session.generation,
    }
}

/// Refresh token expired, revoked or malformed
fn refresh_rejected(err: &TransportError) -> bool {
    matches!(err.status(), Some(400 | 401 | 403))
}

#[async_trait]
impl Authorizer for SessionManager {
    async fn credential(&self) -> Result<Credential, CallError> {
        let Some(session) = self.current() else {
            return Err(CallError::RequiresLogin);
        };
        if session.expires_within(self.clock.now(), self.config.refresh_skew()) {
            debug!(expires_at = %session.expires_at, "Access token near expiry, refreshing");
            return self.refresh_after(session.generation).await;
        }
        Ok(credential_of(&session))
    }

    async fn on_unauthorized(&self, generation: u64) -> Result<Credential, CallError> {
        self.refresh_after(generation).await
    }
}
