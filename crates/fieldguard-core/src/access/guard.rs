//! Render / redirect decisions for protected regions.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::roles::{normalize_path, Role, RoleHierarchy};
use crate::auth::{SessionManager, SessionState};
use crate::config::PortalConfig;

/// What a guarded region demands of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRequirement {
    /// Rendered regardless of session.
    Public,
    /// Only for visitors without a session, e.g. the login page.
    GuestOnly,
    /// Needs a session; an empty role set admits any authenticated role.
    Authenticated { roles: HashSet<Role> },
}

impl AccessRequirement {
    pub fn any_role() -> Self {
        AccessRequirement::Authenticated {
            roles: HashSet::new(),
        }
    }

    pub fn roles(roles: &[Role]) -> Self {
        AccessRequirement::Authenticated {
            roles: roles.iter().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum RedirectReason {
    Login,
    Forbidden,
    AlreadyAuthenticated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum GuardDecision {
    /// Session not restored yet; show a placeholder, reveal nothing.
    Loading,
    Render,
    Redirect { to: String, reason: RedirectReason },
}

impl GuardDecision {
    pub fn is_render(&self) -> bool {
        matches!(self, GuardDecision::Render)
    }
}

pub struct AccessGuard {
    hierarchy: RoleHierarchy,
    login_location: String,
    forbidden_location: String,
    landing_location: String,
}

impl AccessGuard {
    pub fn new(hierarchy: RoleHierarchy, config: &PortalConfig) -> Self {
        Self {
            hierarchy,
            login_location: normalize_path(&config.login_location),
            forbidden_location: normalize_path(&config.forbidden_location),
            landing_location: normalize_path(&config.landing_location),
        }
    }

    /// Guard using the portal's fixed route table.
    pub fn for_portal(config: &PortalConfig) -> Self {
        Self::new(RoleHierarchy::for_portal(config.portal), config)
    }

    pub fn hierarchy(&self) -> &RoleHierarchy {
        &self.hierarchy
    }

    /// Decide for a `state` observed elsewhere, e.g. from `watch()`. An
    /// identity that has expired by `now` counts as no session at all.
    pub fn check(
        &self,
        state: &SessionState,
        requirement: &AccessRequirement,
        now: DateTime<Utc>,
    ) -> GuardDecision {
        match state {
            SessionState::Authenticated(identity) if identity.is_expired_at(now) => {
                self.decide(&SessionState::Unauthenticated, requirement)
            }
            _ => self.decide(state, requirement),
        }
    }

    /// Checks run in a fixed order: loading, guest-only, authentication,
    /// then role, so visitors without a session are always sent to login
    /// and never told "forbidden".
    fn decide(&self, state: &SessionState, requirement: &AccessRequirement) -> GuardDecision {
        if matches!(state, SessionState::Unknown) {
            return GuardDecision::Loading;
        }

        match requirement {
            AccessRequirement::Public => GuardDecision::Render,
            AccessRequirement::GuestOnly => match state {
                SessionState::Authenticated(_) => self.redirect(
                    &self.landing_location,
                    RedirectReason::AlreadyAuthenticated,
                ),
                _ => GuardDecision::Render,
            },
            AccessRequirement::Authenticated { roles } => match state {
                SessionState::Authenticated(identity) => {
                    if RoleHierarchy::is_permitted(identity.role, roles) {
                        GuardDecision::Render
                    } else {
                        self.redirect(&self.forbidden_location, RedirectReason::Forbidden)
                    }
                }
                _ => self.redirect(&self.login_location, RedirectReason::Login),
            },
        }
    }

    /// Requirement for a route: the login page is guest-only, the forbidden
    /// page is public, everything else goes through the role table.
    pub fn requirement_for(&self, path: &str) -> AccessRequirement {
        let path = normalize_path(path);
        if path == self.login_location {
            AccessRequirement::GuestOnly
        } else if path == self.forbidden_location {
            AccessRequirement::Public
        } else {
            match self.hierarchy.required_roles(&path) {
                Some(roles) => AccessRequirement::Authenticated {
                    roles: roles.clone(),
                },
                None => AccessRequirement::any_role(),
            }
        }
    }

    pub fn check_route(
        &self,
        state: &SessionState,
        path: &str,
        now: DateTime<Utc>,
    ) -> GuardDecision {
        self.check(state, &self.requirement_for(path), now)
    }

    /// Decide against the live session. `state()` has already ended an
    /// expired session using the session's own clock.
    pub fn check_session(&self, session: &SessionManager, path: &str) -> GuardDecision {
        self.decide(&session.state(), &self.requirement_for(path))
    }

    fn redirect(&self, to: &str, reason: RedirectReason) -> GuardDecision {
        GuardDecision::Redirect {
            to: to.to_string(),
            reason,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
