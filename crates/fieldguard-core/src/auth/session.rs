//! The session manager: the only writer of session state and of the token store.
//!
//! Every operation resolves to a defined `SessionState` before returning.
//! Requests that suspend (login, refresh, profile checks) remember the
//! session epoch they started under and drop their result if the session
//! was replaced or ended in the meantime, so a logout always wins over a
//! late response.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::codec::TokenCodec;
use super::identity::Identity;
use super::state::{Listener, SessionEvent, SessionState, TransitionCause};
use super::token_store::{Credential, TokenStore};
use crate::access::Role;
use crate::api::{ApiError, AuthApi, User};
use crate::config::PortalConfig;
use crate::error::AuthError;

/// Point-in-time view of the session for navigation and pages.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub identity: Option<Identity>,
    /// Most recent failure, for display next to the login form.
    pub last_error: Option<AuthError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

enum StoreOp<'a> {
    Keep,
    Save(&'a Credential),
    Clear,
}

struct Inner {
    state: SessionState,
    epoch: u64,
    restore_started: bool,
    last_error: Option<AuthError>,
}

pub struct SessionManager {
    config: PortalConfig,
    api: Arc<dyn AuthApi>,
    store: TokenStore,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_subscription: AtomicU64,
    state_tx: watch::Sender<SessionState>,
}

impl SessionManager {
    pub fn new(config: PortalConfig, api: Arc<dyn AuthApi>, store: TokenStore) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Unknown);
        Self {
            config,
            api,
            store,
            clock: Arc::new(SystemClock),
            inner: Mutex::new(Inner {
                state: SessionState::Unknown,
                epoch: 0,
                restore_started: false,
                last_error: None,
            }),
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            state_tx,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Register a listener called synchronously after every transition.
    pub fn subscribe(&self, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.lock_listeners().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Receiver that always holds the latest state.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Current state, after checking the identity for expiry.
    pub fn state(&self) -> SessionState {
        self.check_expiry();
        self.lock_inner().state.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.check_expiry();
        let inner = self.lock_inner();
        SessionSnapshot {
            state: inner.state.clone(),
            identity: inner.state.identity().cloned(),
            last_error: inner.last_error.clone(),
        }
    }

    /// The identity, if authenticated and not expired. An expired identity
    /// ends the session here.
    pub fn current_identity(&self) -> Option<Identity> {
        self.check_expiry().map(|(identity, _)| identity)
    }

    pub fn is_authenticated(&self) -> bool {
        self.current_identity().is_some()
    }

    pub fn role(&self) -> Option<Role> {
        self.current_identity().map(|identity| identity.role)
    }

    pub fn last_error(&self) -> Option<AuthError> {
        self.lock_inner().last_error.clone()
    }

    /// Bearer token for other API calls, only while the session is valid.
    pub fn access_token(&self) -> Option<String> {
        self.check_expiry()?;
        self.store.get().map(|credential| credential.access_token)
    }

    pub fn is_storage_degraded(&self) -> bool {
        self.store.is_degraded()
    }

    // =========================================================================
    // Restore
    // =========================================================================

    /// Establish the session from stored credentials. Runs once; later
    /// calls return the current state.
    pub async fn restore(&self) -> SessionState {
        let epoch = {
            let mut inner = self.lock_inner();
            if inner.restore_started || inner.state != SessionState::Unknown {
                debug!("Session already restored");
                drop(inner);
                return self.state();
            }
            inner.restore_started = true;
            inner.epoch
        };

        let Some(credential) = self.store.get() else {
            debug!(portal = %self.config.portal, "No stored credentials");
            self.commit(
                Some(epoch),
                StoreOp::Keep,
                SessionState::Unauthenticated,
                TransitionCause::Restore,
                None,
            );
            return self.state();
        };

        let identity = match self.identity_from_token(&credential.access_token) {
            Ok(identity) => identity,
            Err(err) => {
                debug!(error = %err, "Stored token rejected, clearing");
                self.commit(
                    Some(epoch),
                    StoreOp::Clear,
                    SessionState::Unauthenticated,
                    TransitionCause::Restore,
                    Some(err),
                );
                return self.state();
            }
        };

        if self.config.verify_on_restore {
            match self.api.profile(&credential.access_token).await {
                Ok(user) => debug!(user_id = %user.id, "Stored token confirmed by server"),
                Err(ApiError::Unauthorized(msg)) | Err(ApiError::AccessDenied(msg)) => {
                    self.commit(
                        Some(epoch),
                        StoreOp::Clear,
                        SessionState::Unauthenticated,
                        TransitionCause::Revoked,
                        Some(AuthError::Credential(msg)),
                    );
                    return self.state();
                }
                Err(err) => {
                    // Tokens are kept so a restart with connectivity can recover
                    let err = AuthError::from(err);
                    self.commit(
                        Some(epoch),
                        StoreOp::Keep,
                        SessionState::Error(err.user_message()),
                        TransitionCause::Restore,
                        Some(err),
                    );
                    return self.state();
                }
            }
        }

        self.commit(
            Some(epoch),
            StoreOp::Keep,
            SessionState::Authenticated(identity),
            TransitionCause::Restore,
            None,
        );
        self.state()
    }

    /// Wait until `restore()` has resolved. Never completes if `restore()`
    /// is never called.
    pub async fn wait_until_restored(&self) -> SessionState {
        let mut rx = self.state_tx.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here
        let _ = rx.wait_for(|state| *state != SessionState::Unknown).await;
        self.state()
    }

    // =========================================================================
    // Login / Logout
    // =========================================================================

    pub async fn login(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            let err = AuthError::Credential("Email and password required".to_string());
            self.lock_inner().last_error = Some(err.clone());
            return Err(err);
        }

        let Some(epoch) = self.commit(
            None,
            StoreOp::Clear,
            SessionState::Authenticating,
            TransitionCause::LoginStarted,
            None,
        ) else {
            return Err(AuthError::Superseded);
        };

        match self.exchange_credentials(email, password).await {
            Ok((identity, credential)) => {
                let applied = self.commit(
                    Some(epoch),
                    StoreOp::Save(&credential),
                    SessionState::Authenticated(identity.clone()),
                    TransitionCause::LoginSucceeded,
                    None,
                );
                match applied {
                    Some(_) => Ok(identity),
                    None => {
                        debug!("Discarding login response for a superseded attempt");
                        Err(AuthError::Superseded)
                    }
                }
            }
            Err(err) => {
                self.commit(
                    Some(epoch),
                    StoreOp::Clear,
                    SessionState::Unauthenticated,
                    TransitionCause::LoginFailed,
                    Some(err.clone()),
                );
                Err(err)
            }
        }
    }

    async fn exchange_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(Identity, Credential), AuthError> {
        let response = self.api.login(email, password).await?;

        // A shared backend will happily authenticate roles that belong to
        // another portal
        let role_allowed = response
            .user
            .role
            .as_deref()
            .and_then(Role::parse)
            .map(|role| self.config.accepts(role))
            .unwrap_or(false);
        if !role_allowed {
            return Err(AuthError::RoleMismatch {
                role: response.user.role.clone().unwrap_or_else(|| "<none>".to_string()),
                portal: self.config.portal,
            });
        }

        let identity = self.identity_from_token(&response.access_token)?;
        Ok((
            identity,
            Credential::new(response.access_token, response.refresh_token),
        ))
    }

    /// End the session locally, then tell the server. Safe to call repeatedly.
    pub async fn logout(&self) {
        let token = self.store.get().map(|credential| credential.access_token);

        self.commit(
            None,
            StoreOp::Clear,
            SessionState::Unauthenticated,
            TransitionCause::Logout,
            None,
        );

        if let Some(token) = token {
            if let Err(e) = self.api.logout(&token).await {
                warn!(error = %e, "Server logout failed, local session already cleared");
            }
        }
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Exchange the refresh token for a new pair. Any failure ends the session.
    pub async fn refresh(&self) -> Result<Identity, AuthError> {
        let Some((_, epoch)) = self.check_expiry() else {
            return Err(AuthError::NotAuthenticated);
        };

        let Some(credential) = self.store.get() else {
            let err = AuthError::NotAuthenticated;
            self.commit(
                Some(epoch),
                StoreOp::Clear,
                SessionState::Unauthenticated,
                TransitionCause::RefreshFailed,
                Some(err.clone()),
            );
            return Err(err);
        };

        let response = self.api.refresh(&credential.refresh_token).await;
        let outcome = match response {
            Ok(pair) => self.identity_from_token(&pair.access_token).map(|identity| {
                let refresh_token = pair.refresh_token.unwrap_or(credential.refresh_token);
                (identity, Credential::new(pair.access_token, refresh_token))
            }),
            Err(e) => Err(AuthError::from(e)),
        };

        match outcome {
            Ok((identity, renewed)) => {
                let applied = self.commit(
                    Some(epoch),
                    StoreOp::Save(&renewed),
                    SessionState::Authenticated(identity.clone()),
                    TransitionCause::Refreshed,
                    None,
                );
                match applied {
                    Some(_) => Ok(identity),
                    None => {
                        debug!("Discarding refresh response for a session that has ended");
                        Err(AuthError::Superseded)
                    }
                }
            }
            Err(err) => {
                let applied = self.commit(
                    Some(epoch),
                    StoreOp::Clear,
                    SessionState::Unauthenticated,
                    TransitionCause::RefreshFailed,
                    Some(err.clone()),
                );
                match applied {
                    Some(_) => Err(err),
                    None => Err(AuthError::Superseded),
                }
            }
        }
    }

    /// True once the access token is within the configured lead time of expiry.
    pub fn needs_refresh(&self) -> bool {
        let lead = Duration::seconds(self.config.refresh_lead_secs);
        self.current_identity()
            .map(|identity| identity.needs_refresh_at(self.clock.now(), lead))
            .unwrap_or(false)
    }

    /// The current identity, refreshing first if it is about to expire.
    pub async fn ensure_fresh(&self) -> Result<Identity, AuthError> {
        let identity = self.current_identity().ok_or(AuthError::NotAuthenticated)?;
        let lead = Duration::seconds(self.config.refresh_lead_secs);
        if identity.needs_refresh_at(self.clock.now(), lead) {
            debug!(
                minutes_left = identity.minutes_until_expiry(self.clock.now()),
                "Access token close to expiry, refreshing"
            );
            self.refresh().await
        } else {
            Ok(identity)
        }
    }

    // =========================================================================
    // Profile
    // =========================================================================

    /// Fetch the server's view of the current user. A 401 ends the session;
    /// network failures leave it untouched.
    pub async fn profile(&self) -> Result<User, AuthError> {
        let (_, epoch) = self.check_expiry().ok_or(AuthError::NotAuthenticated)?;
        let credential = self.store.get().ok_or(AuthError::NotAuthenticated)?;

        match self.api.profile(&credential.access_token).await {
            Ok(user) => Ok(user),
            Err(ApiError::Unauthorized(msg)) => {
                let err = AuthError::Credential(msg);
                self.commit(
                    Some(epoch),
                    StoreOp::Clear,
                    SessionState::Unauthenticated,
                    TransitionCause::Revoked,
                    Some(err.clone()),
                );
                Err(err)
            }
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Listener)>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn identity_from_token(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = TokenCodec::decode(token)?;
        Identity::from_claims(&claims, &self.config, self.clock.now())
    }

    /// Authenticated identity and its epoch. Ends the session if the
    /// identity has expired.
    fn check_expiry(&self) -> Option<(Identity, u64)> {
        let now = self.clock.now();
        let (identity, epoch) = {
            let inner = self.lock_inner();
            match &inner.state {
                SessionState::Authenticated(identity) => (identity.clone(), inner.epoch),
                _ => return None,
            }
        };

        if identity.is_expired_at(now) {
            self.commit(
                Some(epoch),
                StoreOp::Clear,
                SessionState::Unauthenticated,
                TransitionCause::Expired,
                Some(AuthError::Expired),
            );
            return None;
        }
        Some((identity, epoch))
    }

    /// Apply a transition if the session is still at `expected_epoch`.
    /// Returns the epoch after the transition, or `None` if it was stale.
    fn commit(
        &self,
        expected_epoch: Option<u64>,
        store_op: StoreOp<'_>,
        to: SessionState,
        cause: TransitionCause,
        error: Option<AuthError>,
    ) -> Option<u64> {
        let (epoch, event) = {
            let mut inner = self.lock_inner();
            if let Some(expected) = expected_epoch {
                if inner.epoch != expected {
                    debug!(expected, current = inner.epoch, cause = ?cause, "Dropping stale transition");
                    return None;
                }
            }

            let saved = matches!(store_op, StoreOp::Save(_));
            match store_op {
                StoreOp::Keep => {}
                StoreOp::Save(credential) => {
                    self.store.set(&credential.access_token, &credential.refresh_token)
                }
                StoreOp::Clear => self.store.clear(),
            }
            // A session held only in memory ends with the process; say so
            let error = match error {
                None if saved => self.store.failure().map(AuthError::Storage),
                error => error,
            };

            if cause.invalidates_pending() {
                inner.epoch += 1;
            }
            inner.last_error = error.clone();

            if inner.state == to {
                return Some(inner.epoch);
            }

            let from = std::mem::replace(&mut inner.state, to.clone());
            self.state_tx.send_replace(to.clone());
            (
                inner.epoch,
                SessionEvent {
                    from,
                    to,
                    cause,
                    error,
                    at: self.clock.now(),
                },
            )
        };

        self.notify(&event);
        Some(epoch)
    }

    fn notify(&self, event: &SessionEvent) {
        let listeners: Vec<Listener> = self
            .lock_listeners()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}
