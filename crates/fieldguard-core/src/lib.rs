//! Client-side session management and role-based access control for the
//! field-service portals.
//!
//! One parameterized implementation serves every portal: each front-end
//! builds a `SessionManager` from its `PortalConfig`, restores the session
//! on startup and asks an `AccessGuard` before showing any protected route.

pub mod access;
pub mod api;
pub mod auth;
pub mod config;
pub mod error;

pub use access::{AccessGuard, AccessRequirement, GuardDecision, RedirectReason, Role, RoleHierarchy};
pub use api::{ApiError, AuthApi, HttpAuthApi, User};
pub use auth::{Identity, SessionManager, SessionSnapshot, SessionState, TokenStore, TransitionLogger};
pub use config::{Portal, PortalConfig, StorageKind};
pub use error::AuthError;
