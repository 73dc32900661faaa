//! Roles and the per-portal route table.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Portal;

// ============================================================================
// Role
// ============================================================================

/// The closed set of roles the backend can assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum Role {
    Admin,
    /// Office staff who schedule and dispatch jobs.
    #[serde(alias = "dispatcher")]
    Manager,
    Technician,
    Customer,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Manager, Role::Technician, Role::Customer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Technician => "technician",
            Role::Customer => "customer",
        }
    }

    /// Parses a raw role claim. Unknown strings yield `None`, never a default role.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "admin" | "administrator" => Some(Role::Admin),
            "manager" | "dispatcher" => Some(Role::Manager),
            "technician" | "tech" => Some(Role::Technician),
            "customer" | "client" => Some(Role::Customer),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Role Hierarchy
// ============================================================================

const ADMIN_ROUTES: &[(&str, &[Role])] = &[
    ("/dashboard", &[]),
    ("/jobs", &[Role::Admin, Role::Manager]),
    ("/customers", &[Role::Admin, Role::Manager]),
    ("/technicians", &[Role::Admin, Role::Manager]),
    ("/reports", &[Role::Admin, Role::Manager]),
    ("/logs", &[Role::Admin]),
    ("/users", &[Role::Admin]),
    ("/settings", &[Role::Admin]),
];

const CUSTOMER_ROUTES: &[(&str, &[Role])] = &[
    ("/dashboard", &[]),
    ("/jobs", &[Role::Customer]),
    ("/invoices", &[Role::Customer]),
    ("/profile", &[]),
];

const TECHNICIAN_ROUTES: &[(&str, &[Role])] = &[
    ("/dashboard", &[]),
    ("/jobs", &[Role::Technician]),
    ("/logs", &[Role::Technician]),
    ("/profile", &[]),
];

#[derive(Debug, Clone)]
struct RouteRule {
    path: String,
    segments: Vec<String>,
    roles: HashSet<Role>,
}

/// Static mapping from protected resource to the roles permitted to open it.
///
/// Built once at startup. An empty role set means any authenticated role.
/// Table order is kept so navigation menus come out in a stable order.
#[derive(Debug, Clone, Default)]
pub struct RoleHierarchy {
    rules: Vec<RouteRule>,
}

impl RoleHierarchy {
    pub fn from_table(table: &[(&str, &[Role])]) -> Self {
        let rules = table
            .iter()
            .map(|(path, roles)| RouteRule {
                path: normalize_path(path),
                segments: segments(path),
                roles: roles.iter().copied().collect(),
            })
            .collect();
        Self { rules }
    }

    /// The fixed route table for a portal.
    pub fn for_portal(portal: Portal) -> Self {
        match portal {
            Portal::Admin => Self::from_table(ADMIN_ROUTES),
            Portal::Customer => Self::from_table(CUSTOMER_ROUTES),
            Portal::Technician => Self::from_table(TECHNICIAN_ROUTES),
        }
    }

    pub fn is_permitted(role: Role, required: &HashSet<Role>) -> bool {
        required.is_empty() || required.contains(&role)
    }

    /// Roles required for `resource`, taken from the longest registered
    /// path prefix (by segment). `None` if no rule covers it.
    pub fn required_roles(&self, resource: &str) -> Option<&HashSet<Role>> {
        let wanted = segments(resource);
        self.rules
            .iter()
            .filter(|rule| wanted.starts_with(&rule.segments))
            .max_by_key(|rule| rule.segments.len())
            .map(|rule| &rule.roles)
    }

    /// Whether `role` may open `resource`. Uncovered resources only need
    /// an authenticated session.
    pub fn can_access(&self, role: Role, resource: &str) -> bool {
        self.required_roles(resource)
            .map(|required| Self::is_permitted(role, required))
            .unwrap_or(true)
    }

    /// Registered resources `role` may open, in table order.
    pub fn navigation(&self, role: Role) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|rule| Self::is_permitted(role, &rule.roles))
            .map(|rule| rule.path.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Path without query string, fragment or trailing slash.
pub(crate) fn normalize_path(path: &str) -> String {
    format!("/{}", segments(path).join("/"))
}

fn segments(path: &str) -> Vec<String> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
