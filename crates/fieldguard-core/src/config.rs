//! Per-portal configuration.
//!
//! Each front-end (admin dashboard, customer portal, technician client) runs
//! the same session code with its own `PortalConfig`: storage namespace,
//! accepted roles, API location and guard destinations.
//!
//! Overrides are read from `~/.config/fieldguard/<portal>.json`, then from
//! `FIELDGUARD_API_URL` / `FIELDGUARD_STORAGE` in the environment.

use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::access::Role;
use crate::auth::token_store::{FileBackend, KeyringBackend, TokenStore};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "fieldguard";

const DEFAULT_API_URL: &str = "http://localhost:5000/api";

/// 30s allows for slow API responses while failing fast enough for good UX.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Refresh once the access token is within 5 minutes of expiry.
const DEFAULT_REFRESH_LEAD_SECS: i64 = 300;

const ENV_API_URL: &str = "FIELDGUARD_API_URL";
const ENV_STORAGE: &str = "FIELDGUARD_STORAGE";

// ============================================================================
// Portal
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Portal {
    Admin,
    Customer,
    Technician,
}

impl Portal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Portal::Admin => "admin",
            Portal::Customer => "customer",
            Portal::Technician => "technician",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Some(Portal::Admin),
            "customer" => Some(Portal::Customer),
            "technician" => Some(Portal::Technician),
            _ => None,
        }
    }

    /// Roles that may hold a session in this portal.
    pub fn default_roles(&self) -> Vec<Role> {
        match self {
            Portal::Admin => vec![Role::Admin, Role::Manager],
            Portal::Customer => vec![Role::Customer],
            Portal::Technician => vec![Role::Technician],
        }
    }
}

impl fmt::Display for Portal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    #[default]
    File,
    Keyring,
}

impl StorageKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Some(StorageKind::Memory),
            "file" => Some(StorageKind::File),
            "keyring" | "keychain" => Some(StorageKind::Keyring),
            _ => None,
        }
    }
}

// ============================================================================
// Portal Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalConfig {
    pub portal: Portal,
    /// Prefix for storage keys: `<namespace>_token`, `<namespace>_refresh_token`.
    pub namespace: String,
    pub accepted_roles: Vec<Role>,
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub login_location: String,
    pub forbidden_location: String,
    pub landing_location: String,
    pub refresh_lead_secs: i64,
    /// Ask the server to confirm a restored token via `/auth/profile`.
    pub verify_on_restore: bool,
    pub storage: StorageKind,
}

/// On-disk overrides; every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub namespace: Option<String>,
    pub accepted_roles: Option<Vec<Role>>,
    pub api_base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub login_location: Option<String>,
    pub forbidden_location: Option<String>,
    pub landing_location: Option<String>,
    pub refresh_lead_secs: Option<i64>,
    pub verify_on_restore: Option<bool>,
    pub storage: Option<StorageKind>,
}

impl PortalConfig {
    /// Built-in defaults for a portal.
    pub fn for_portal(portal: Portal) -> Self {
        Self {
            portal,
            namespace: portal.as_str().to_string(),
            accepted_roles: portal.default_roles(),
            api_base_url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            login_location: "/login".to_string(),
            forbidden_location: "/unauthorized".to_string(),
            landing_location: "/dashboard".to_string(),
            refresh_lead_secs: DEFAULT_REFRESH_LEAD_SECS,
            verify_on_restore: false,
            storage: StorageKind::File,
        }
    }

    /// Defaults, then the portal's config file, then environment overrides.
    pub fn load(portal: Portal) -> Result<Self> {
        let mut config = Self::for_portal(portal);

        let path = Self::config_path(portal)?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let file: ConfigFile = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            config.apply(file);
            debug!(path = %path.display(), "Portal config loaded");
        }

        config.apply_env();
        Ok(config)
    }

    pub fn apply(&mut self, file: ConfigFile) {
        if let Some(namespace) = file.namespace {
            self.namespace = namespace;
        }
        if let Some(roles) = file.accepted_roles {
            self.accepted_roles = roles;
        }
        if let Some(url) = file.api_base_url {
            self.api_base_url = url;
        }
        if let Some(secs) = file.request_timeout_secs {
            self.request_timeout_secs = secs;
        }
        if let Some(location) = file.login_location {
            self.login_location = location;
        }
        if let Some(location) = file.forbidden_location {
            self.forbidden_location = location;
        }
        if let Some(location) = file.landing_location {
            self.landing_location = location;
        }
        if let Some(secs) = file.refresh_lead_secs {
            self.refresh_lead_secs = secs;
        }
        if let Some(verify) = file.verify_on_restore {
            self.verify_on_restore = verify;
        }
        if let Some(storage) = file.storage {
            self.storage = storage;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            if !url.is_empty() {
                self.api_base_url = url;
            }
        }
        if let Ok(raw) = std::env::var(ENV_STORAGE) {
            match StorageKind::parse(&raw) {
                Some(kind) => self.storage = kind,
                None => warn!(value = %raw, "Ignoring unknown {} value", ENV_STORAGE),
            }
        }
    }

    pub fn accepts(&self, role: Role) -> bool {
        self.accepted_roles.contains(&role)
    }

    fn config_path(portal: Portal) -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir
            .join(APP_NAME)
            .join(format!("{}.json", portal.as_str())))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Token store for this portal's configured backend. Falls back to
    /// memory when the backend's location cannot be resolved.
    pub fn open_token_store(&self) -> TokenStore {
        match self.storage {
            StorageKind::Memory => TokenStore::in_memory(&self.namespace),
            StorageKind::Keyring => {
                TokenStore::new(&self.namespace, Box::new(KeyringBackend::new(APP_NAME)))
            }
            StorageKind::File => match self.cache_dir() {
                Ok(dir) => {
                    let backend = FileBackend::new(dir, &self.namespace);
                    TokenStore::new(&self.namespace, Box::new(backend))
                }
                Err(e) => {
                    warn!(error = %e, "No cache directory, keeping session in memory");
                    TokenStore::in_memory(&self.namespace)
                }
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portal_defaults() {
        let customer = PortalConfig::for_portal(Portal::Customer);
        assert_eq!(customer.namespace, "customer");
        assert_eq!(customer.accepted_roles, vec![Role::Customer]);
        assert!(customer.accepts(Role::Customer));
        assert!(!customer.accepts(Role::Technician));

        let admin = PortalConfig::for_portal(Portal::Admin);
        assert!(admin.accepts(Role::Manager));
        assert!(!admin.accepts(Role::Customer));
    }

    #[test]
    fn test_apply_overrides_only_present_fields() {
        let mut config = PortalConfig::for_portal(Portal::Technician);
        let file: ConfigFile = serde_json::from_str(
            r#"{"api_base_url":"https://fsm.example.com/api","verify_on_restore":true,"storage":"keyring"}"#,
        )
        .unwrap();
        config.apply(file);

        assert_eq!(config.api_base_url, "https://fsm.example.com/api");
        assert!(config.verify_on_restore);
        assert_eq!(config.storage, StorageKind::Keyring);
        // Untouched fields keep the portal defaults
        assert_eq!(config.namespace, "technician");
        assert_eq!(config.login_location, "/login");
    }

    #[test]
    fn test_portal_and_storage_parse() {
        assert_eq!(Portal::parse("Customer"), Some(Portal::Customer));
        assert_eq!(Portal::parse("tech"), None);
        assert_eq!(StorageKind::parse("KEYCHAIN"), Some(StorageKind::Keyring));
        assert_eq!(StorageKind::parse("redis"), None);
    }
}
