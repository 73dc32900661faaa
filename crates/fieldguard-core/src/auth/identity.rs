use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::codec::{Claims, DecodeError, TokenCodec};
use crate::access::Role;
use crate::config::PortalConfig;
use crate::error::AuthError;

/// Who the current access token says we are. Always recomputed from the
/// stored token, never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Identity {
    /// Builds an identity from decoded claims for use inside `portal`.
    ///
    /// Fails on expired tokens, on roles outside the known set and on roles
    /// the portal does not accept. A token without `iat` is treated as
    /// issued at `now`.
    pub fn from_claims(
        claims: &Claims,
        portal: &PortalConfig,
        now: DateTime<Utc>,
    ) -> Result<Self, AuthError> {
        let user_id = claims
            .user_id
            .clone()
            .ok_or(DecodeError::MissingClaim("sub"))?;

        let expires_at = match claims.expires_at {
            Some(at) if !TokenCodec::is_expired(claims, now) => at,
            _ => return Err(AuthError::Expired),
        };

        let role = TokenCodec::role_of(claims)
            .filter(|role| portal.accepts(*role))
            .ok_or_else(|| AuthError::RoleMismatch {
                role: claims.role.clone().unwrap_or_else(|| "<none>".to_string()),
                portal: portal.portal,
            })?;

        Ok(Self {
            user_id,
            role,
            issued_at: claims.issued_at.unwrap_or(now),
            expires_at,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// True once `now` is inside the refresh lead window before expiry.
    pub fn needs_refresh_at(&self, now: DateTime<Utc>, lead: Duration) -> bool {
        now >= self.expires_at - lead
    }

    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        self.time_until_expiry(now).num_minutes().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Portal;

    fn claims(role: Option<&str>, expires_in: Option<i64>, now: DateTime<Utc>) -> Claims {
        Claims {
            user_id: Some("u-1".to_string()),
            role: role.map(str::to_string),
            email: None,
            issued_at: None,
            expires_at: expires_in.map(|secs| now + Duration::seconds(secs)),
        }
    }

    #[test]
    fn test_from_claims_accepted_role() {
        let now = Utc::now();
        let portal = PortalConfig::for_portal(Portal::Technician);
        let identity = Identity::from_claims(&claims(Some("technician"), Some(600), now), &portal, now)
            .unwrap();
        assert_eq!(identity.role, Role::Technician);
        assert_eq!(identity.issued_at, now);
        assert_eq!(identity.minutes_until_expiry(now), 10);
    }

    #[test]
    fn test_from_claims_rejects_other_portal_role() {
        let now = Utc::now();
        let portal = PortalConfig::for_portal(Portal::Customer);
        let err = Identity::from_claims(&claims(Some("technician"), Some(600), now), &portal, now)
            .unwrap_err();
        assert_eq!(
            err,
            AuthError::RoleMismatch { role: "technician".to_string(), portal: Portal::Customer }
        );
    }

    #[test]
    fn test_from_claims_expiry_checked_before_role() {
        let now = Utc::now();
        let portal = PortalConfig::for_portal(Portal::Admin);
        let expired = claims(Some("admin"), Some(-1), now);
        assert_eq!(Identity::from_claims(&expired, &portal, now), Err(AuthError::Expired));

        let no_expiry = claims(Some("admin"), None, now);
        assert_eq!(Identity::from_claims(&no_expiry, &portal, now), Err(AuthError::Expired));
    }

    #[test]
    fn test_from_claims_missing_subject() {
        let now = Utc::now();
        let portal = PortalConfig::for_portal(Portal::Admin);
        let mut c = claims(Some("admin"), Some(600), now);
        c.user_id = None;
        assert_eq!(
            Identity::from_claims(&c, &portal, now),
            Err(AuthError::Decode(DecodeError::MissingClaim("sub")))
        );
    }

    #[test]
    fn test_needs_refresh_window() {
        let now = Utc::now();
        let portal = PortalConfig::for_portal(Portal::Admin);
        let identity =
            Identity::from_claims(&claims(Some("admin"), Some(600), now), &portal, now).unwrap();
        assert!(!identity.needs_refresh_at(now, Duration::minutes(5)));
        assert!(identity.needs_refresh_at(now + Duration::minutes(6), Duration::minutes(5)));
        assert!(!identity.is_expired_at(now + Duration::minutes(9)));
        assert!(identity.is_expired_at(now + Duration::minutes(10)));
    }
}
