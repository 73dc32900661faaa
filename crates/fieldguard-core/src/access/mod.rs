//! Role-based access control for portal routes and UI regions.
//!
//! This module provides:
//! - `Role` and `RoleHierarchy`: the closed role set and the per-portal
//!   table of which roles may open which routes
//! - `AccessGuard`: the render / redirect decision for a guarded region

pub mod guard;
pub mod roles;

pub use guard::{AccessGuard, AccessRequirement, GuardDecision, RedirectReason};
pub use roles::{Role, RoleHierarchy};
