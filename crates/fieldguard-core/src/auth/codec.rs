//! Unverified decoding of access-token claims.
//!
//! Signature verification belongs to the server. The client only reads the
//! payload segment to learn who it is, what role it holds and when the
//! token stops being usable.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::access::Role;
use crate::api::models::{pick_id, pick_str};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected 3 dot-separated segments, found {0}")]
    Segments(usize),

    #[error("claims segment is not valid base64url: {0}")]
    Base64(String),

    #[error("claims segment is not a JSON object: {0}")]
    Json(String),

    #[error("token has no '{0}' claim")]
    MissingClaim(&'static str),
}

/// Claims read from the payload segment, with field naming normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub user_id: Option<String>,
    /// Raw role claim, not yet mapped onto `Role`.
    pub role: Option<String>,
    pub email: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct TokenCodec;

impl TokenCodec {
    pub fn decode(token: &str) -> Result<Claims, DecodeError> {
        let parts: Vec<&str> = token.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(DecodeError::Segments(parts.len()));
        }

        // Some issuers pad the segments even though JWTs should not be
        let payload = parts[1].trim_end_matches('=');
        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| DecodeError::Base64(e.to_string()))?;

        let value: Value =
            serde_json::from_slice(&bytes).map_err(|e| DecodeError::Json(e.to_string()))?;
        let obj = value
            .as_object()
            .ok_or_else(|| DecodeError::Json("payload is not an object".to_string()))?;

        let role = pick_str(obj, &["role"]).or_else(|| {
            obj.get("roles")
                .and_then(|r| r.as_array())
                .and_then(|roles| roles.iter().find_map(|r| r.as_str()))
                .map(str::to_string)
        });

        Ok(Claims {
            user_id: pick_id(obj, &["sub", "userId", "user_id", "id"]),
            role,
            email: pick_str(obj, &["email"]),
            issued_at: timestamp(obj.get("iat")),
            expires_at: timestamp(obj.get("exp")),
        })
    }

    /// True if the token is at or past its expiry. A token without an
    /// expiry counts as expired.
    pub fn is_expired(claims: &Claims, now: DateTime<Utc>) -> bool {
        match claims.expires_at {
            Some(expires_at) => expires_at <= now,
            None => true,
        }
    }

    /// Maps the raw role claim onto the closed role set.
    pub fn role_of(claims: &Claims) -> Option<Role> {
        claims.role.as_deref().and_then(Role::parse)
    }
}

/// Seconds since the epoch, as an integer or float claim.
fn timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let secs = match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        Value::String(s) => s.parse::<i64>().ok()?,
        _ => return None,
    };
    DateTime::from_timestamp(secs, 0)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn token(payload: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{}.{}.signature", header, body)
    }

    #[test]
    fn test_decode_standard_claims() {
        let claims = TokenCodec::decode(&token(&json!({
            "sub": "u-17", "role": "technician", "iat": 1_700_000_000, "exp": 1_700_003_600
        })))
        .unwrap();

        assert_eq!(claims.user_id.as_deref(), Some("u-17"));
        assert_eq!(TokenCodec::role_of(&claims), Some(Role::Technician));
        assert_eq!(claims.issued_at.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(claims.expires_at.unwrap().timestamp(), 1_700_003_600);
    }

    #[test]
    fn test_decode_normalizes_id_and_roles_array() {
        let claims = TokenCodec::decode(&token(&json!({
            "id": 99, "roles": ["dispatcher"], "exp": 1_700_003_600.0
        })))
        .unwrap();
        assert_eq!(claims.user_id.as_deref(), Some("99"));
        assert_eq!(TokenCodec::role_of(&claims), Some(Role::Manager));
        assert!(claims.expires_at.is_some());
    }

    #[test]
    fn test_decode_wrong_segment_count() {
        assert_eq!(TokenCodec::decode(""), Err(DecodeError::Segments(1)));
        assert_eq!(TokenCodec::decode("abc"), Err(DecodeError::Segments(1)));
        assert_eq!(TokenCodec::decode("a.b"), Err(DecodeError::Segments(2)));
        assert_eq!(TokenCodec::decode("a.b.c.d"), Err(DecodeError::Segments(4)));
    }

    #[test]
    fn test_decode_invalid_base64() {
        assert!(matches!(
            TokenCodec::decode("header.!!not-base64!!.sig"),
            Err(DecodeError::Base64(_))
        ));
    }

    #[test]
    fn test_decode_invalid_json() {
        let garbage = URL_SAFE_NO_PAD.encode("{not json");
        assert!(matches!(
            TokenCodec::decode(&format!("h.{}.s", garbage)),
            Err(DecodeError::Json(_))
        ));

        let array = URL_SAFE_NO_PAD.encode("[1,2,3]");
        assert!(matches!(
            TokenCodec::decode(&format!("h.{}.s", array)),
            Err(DecodeError::Json(_))
        ));

        assert!(matches!(TokenCodec::decode("h..s"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_decode_tolerates_padding() {
        let body = base64::engine::general_purpose::URL_SAFE.encode(r#"{"sub":"x"}"#);
        let claims = TokenCodec::decode(&format!("h.{}.s", body)).unwrap();
        assert_eq!(claims.user_id.as_deref(), Some("x"));
    }

    #[test]
    fn test_is_expired_boundaries() {
        let now = Utc::now();
        let mut claims = TokenCodec::decode(&token(&json!({ "sub": "u" }))).unwrap();

        // Missing expiry fails closed
        assert!(TokenCodec::is_expired(&claims, now));

        claims.expires_at = Some(now);
        assert!(TokenCodec::is_expired(&claims, now));

        claims.expires_at = Some(now - Duration::seconds(1));
        assert!(TokenCodec::is_expired(&claims, now));

        claims.expires_at = Some(now + Duration::seconds(1));
        assert!(!TokenCodec::is_expired(&claims, now));
    }

    #[test]
    fn test_unknown_role_is_absent() {
        let claims = TokenCodec::decode(&token(&json!({ "sub": "u", "role": "owner" }))).unwrap();
        assert_eq!(claims.role.as_deref(), Some("owner"));
        assert_eq!(TokenCodec::role_of(&claims), None);

        let no_role = TokenCodec::decode(&token(&json!({ "sub": "u" }))).unwrap();
        assert_eq!(TokenCodec::role_of(&no_role), None);
    }
}
