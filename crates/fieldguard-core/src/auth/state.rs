//! Session state and the transition events published on every change.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::identity::Identity;
use crate::error::AuthError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Stored credentials have not been checked yet.
    #[default]
    Unknown,
    Unauthenticated,
    Authenticating,
    Authenticated(Identity),
    /// The session could not be established or verified; the reason is user-facing.
    Error(String),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Unknown => "unknown",
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticating => "authenticating",
            SessionState::Authenticated(_) => "authenticated",
            SessionState::Error(_) => "error",
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionState::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }
}

/// Why a transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    Restore,
    LoginStarted,
    LoginSucceeded,
    LoginFailed,
    Logout,
    Refreshed,
    RefreshFailed,
    Expired,
    /// The server refused a token the client still considered valid.
    Revoked,
}

impl TransitionCause {
    /// Causes that end (or replace) the session a pending request was made for.
    pub(crate) fn invalidates_pending(&self) -> bool {
        matches!(
            self,
            TransitionCause::LoginStarted
                | TransitionCause::Logout
                | TransitionCause::RefreshFailed
                | TransitionCause::Expired
                | TransitionCause::Revoked
        )
    }

    fn is_forced(&self) -> bool {
        matches!(
            self,
            TransitionCause::RefreshFailed | TransitionCause::Expired | TransitionCause::Revoked
        )
    }
}

#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub from: SessionState,
    pub to: SessionState,
    pub cause: TransitionCause,
    pub error: Option<AuthError>,
    pub at: DateTime<Utc>,
}

pub type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Turns session transitions into `tracing` events.
pub struct TransitionLogger;

impl TransitionLogger {
    pub fn listener() -> Listener {
        Arc::new(Self::log)
    }

    pub fn log(event: &SessionEvent) {
        let user_id = event.to.identity().or(event.from.identity()).map(|i| i.user_id.as_str());
        let role = event.to.identity().map(|i| i.role.as_str());

        match (&event.error, event.cause.is_forced()) {
            (Some(AuthError::RoleMismatch { role, portal }), _) => warn!(
                from = event.from.name(),
                to = event.to.name(),
                cause = ?event.cause,
                rejected_role = %role,
                portal = %portal,
                "Session rejected: role not valid for this portal"
            ),
            (error, true) => warn!(
                from = event.from.name(),
                to = event.to.name(),
                cause = ?event.cause,
                user_id = ?user_id,
                error = ?error.as_ref().map(|e| e.to_string()),
                "Session ended"
            ),
            (Some(error), false) => info!(
                from = event.from.name(),
                to = event.to.name(),
                cause = ?event.cause,
                error = %error,
                "Session transition"
            ),
            (None, false) => info!(
                from = event.from.name(),
                to = event.to.name(),
                cause = ?event.cause,
                user_id = ?user_id,
                role = ?role,
                "Session transition"
            ),
        }
    }
}
