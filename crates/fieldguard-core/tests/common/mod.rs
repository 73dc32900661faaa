//! Shared fixtures: a scripted auth API, unsigned tokens and a session harness.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tokio::sync::Notify;

use fieldguard_core::api::{ApiError, AuthApi, LoginResponse, TokenPair, User};
use fieldguard_core::auth::{
    KeyValueBackend, ManualClock, MemoryBackend, SessionEvent, SessionManager, TokenStore,
};
use fieldguard_core::config::{Portal, PortalConfig};

/// 2025-03-01T12:00:00Z
pub fn start_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_740_830_400, 0).unwrap()
}

/// An unsigned token with the given claims; the signature is never checked client-side.
pub fn token(sub: &str, role: &str, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        json!({
            "sub": sub,
            "role": role,
            "iat": issued_at.timestamp(),
            "exp": expires_at.timestamp(),
        })
        .to_string(),
    );
    format!("{}.{}.sig", header, payload)
}

/// A token for `role` valid for an hour from the harness start time.
pub fn fresh_token(role: &str) -> String {
    token("user-1", role, start_time(), start_time() + Duration::hours(1))
}

pub fn user(id: &str, role: &str) -> User {
    User {
        id: id.to_string(),
        role: Some(role.to_string()),
        email: Some(format!("{}@example.com", id)),
        first_name: None,
        last_name: None,
    }
}

pub fn login_ok(role: &str) -> Result<LoginResponse, ApiError> {
    Ok(LoginResponse {
        access_token: fresh_token(role),
        refresh_token: "refresh-1".to_string(),
        user: user("user-1", role),
    })
}

/// Scripted `AuthApi`: each call pops the next queued response.
#[derive(Default)]
pub struct MockApi {
    login: Mutex<VecDeque<Result<LoginResponse, ApiError>>>,
    refresh: Mutex<VecDeque<Result<TokenPair, ApiError>>>,
    profile: Mutex<VecDeque<Result<User, ApiError>>>,
    logout_error: Mutex<Option<ApiError>>,
    refresh_entered: Mutex<Option<Arc<Notify>>>,
    refresh_gate: Mutex<Option<Arc<Notify>>>,
    calls: Mutex<Vec<String>>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_login(&self, result: Result<LoginResponse, ApiError>) {
        self.login.lock().unwrap().push_back(result);
    }

    pub fn push_refresh(&self, result: Result<TokenPair, ApiError>) {
        self.refresh.lock().unwrap().push_back(result);
    }

    pub fn push_profile(&self, result: Result<User, ApiError>) {
        self.profile.lock().unwrap().push_back(result);
    }

    pub fn fail_logout(&self, error: ApiError) {
        *self.logout_error.lock().unwrap() = Some(error);
    }

    /// Hold refresh responses until the returned gate is notified. The first
    /// notifier fires once the refresh request has been sent.
    pub fn hold_refresh(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        *self.refresh_entered.lock().unwrap() = Some(Arc::clone(&entered));
        *self.refresh_gate.lock().unwrap() = Some(Arc::clone(&gate));
        (entered, gate)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl AuthApi for MockApi {
    async fn login(&self, email: &str, _password: &str) -> Result<LoginResponse, ApiError> {
        self.record(&format!("login:{}", email));
        self.login
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Network("no scripted login".into())))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        self.record(&format!("refresh:{}", refresh_token));
        let entered = self.refresh_entered.lock().unwrap().clone();
        let gate = self.refresh_gate.lock().unwrap().clone();
        if let Some(entered) = entered {
            entered.notify_one();
        }
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.refresh
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Network("no scripted refresh".into())))
    }

    async fn logout(&self, _access_token: &str) -> Result<(), ApiError> {
        self.record("logout");
        match self.logout_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn profile(&self, _access_token: &str) -> Result<User, ApiError> {
        self.record("profile");
        self.profile
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Network("no scripted profile".into())))
    }
}

pub struct Harness {
    pub api: Arc<MockApi>,
    pub backend: Arc<MemoryBackend>,
    pub clock: Arc<ManualClock>,
    pub session: Arc<SessionManager>,
    pub events: Arc<Mutex<Vec<SessionEvent>>>,
    namespace: String,
}

impl Harness {
    pub fn new(portal: Portal) -> Self {
        Self::with_config(PortalConfig::for_portal(portal))
    }

    pub fn with_config(config: PortalConfig) -> Self {
        let api = MockApi::new();
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let namespace = config.namespace.clone();

        let store = TokenStore::new(&namespace, Box::new(Arc::clone(&backend)));
        let session = SessionManager::new(config, api.clone(), store).with_clock(clock.clone());

        let events = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&events);
        session.subscribe(Arc::new(move |event: &SessionEvent| {
            recorder.lock().unwrap().push(event.clone());
        }));

        Self {
            api,
            backend,
            clock,
            session: Arc::new(session),
            events,
            namespace,
        }
    }

    /// Put a token pair in storage as a previous run would have left it.
    pub fn seed(&self, access_token: &str, refresh_token: &str) {
        let access_key = format!("{}_token", self.namespace);
        let refresh_key = format!("{}_refresh_token", self.namespace);
        self.backend
            .write(&[(access_key.as_str(), access_token), (refresh_key.as_str(), refresh_token)])
            .unwrap();
    }

    pub fn stored_access_token(&self) -> Option<String> {
        self.backend.read(&format!("{}_token", self.namespace)).unwrap()
    }

    pub fn stored_refresh_token(&self) -> Option<String> {
        self.backend
            .read(&format!("{}_refresh_token", self.namespace))
            .unwrap()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Seed a valid token for `role` and restore from it.
    pub async fn signed_in(portal: Portal, role: &str) -> Self {
        let harness = Self::new(portal);
        harness.seed(&fresh_token(role), "refresh-1");
        harness.session.restore().await;
        harness
    }
}
