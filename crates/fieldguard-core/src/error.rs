//! Error taxonomy for session and access-control operations.
//!
//! Every session operation resolves to one of these variants instead of
//! panicking, so callers always receive a tagged result alongside a
//! well-defined session state.

use thiserror::Error;

use crate::api::ApiError;
use crate::auth::codec::DecodeError;
use crate::config::Portal;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("Invalid token: {0}")]
    Decode(#[from] DecodeError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid credentials: {0}")]
    Credential(String),

    #[error("Role '{role}' is not permitted in the {portal} portal")]
    RoleMismatch { role: String, portal: Portal },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Session expired")]
    Expired,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Session changed while the request was in flight")]
    Superseded,
}

impl AuthError {
    /// Message suitable for display next to a login form.
    ///
    /// Role mismatches read exactly like bad credentials so the portal does
    /// not reveal that the account exists elsewhere.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Credential(_) | AuthError::RoleMismatch { .. } => {
                "Invalid email or password".to_string()
            }
            AuthError::Network(_) => {
                "Unable to reach the server. Please try again.".to_string()
            }
            AuthError::Decode(_) => {
                "The server returned an invalid session. Please sign in again.".to_string()
            }
            AuthError::Expired => "Your session has expired. Please sign in again.".to_string(),
            AuthError::NotAuthenticated | AuthError::Superseded => {
                "Please sign in to continue.".to_string()
            }
            AuthError::Storage(_) => {
                "Your session could not be saved and will end when you close the app.".to_string()
            }
        }
    }

    /// Whether the user should simply retry the same action.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::Network(_))
    }
}

impl From<ApiError> for AuthError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized(msg) | ApiError::AccessDenied(msg) => AuthError::Credential(msg),
            ApiError::Rejected { message, .. } => AuthError::Credential(message),
            ApiError::NotFound(_)
            | ApiError::RateLimited
            | ApiError::ServerError(_)
            | ApiError::Network(_)
            | ApiError::InvalidResponse(_) => AuthError::Network(err.to_string()),
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
    fn test_role_mismatch_reads_like_bad_credentials() {
        let mismatch = AuthError::RoleMismatch {
            role: "technician".to_string(),
            portal: Portal::Customer,
        };
        let bad_password = AuthError::Credential("wrong password".to_string());
        assert_eq!(mismatch.user_message(), bad_password.user_message());
        // Diagnostics still tell them apart
        assert_ne!(mismatch.to_string(), bad_password.to_string());
        assert!(mismatch.to_string().contains("technician"));
    }

    #[test]
    fn test_api_error_mapping() {
        assert!(matches!(
            AuthError::from(ApiError::Unauthorized("bad".into())),
            AuthError::Credential(_)
        ));
        assert!(matches!(
            AuthError::from(ApiError::Rejected { status: 422, message: "missing email".into() }),
            AuthError::Credential(_)
        ));
        assert!(matches!(
            AuthError::from(ApiError::Network("connection refused".into())),
            AuthError::Network(_)
        ));
        assert!(matches!(
            AuthError::from(ApiError::ServerError("boom".into())),
            AuthError::Network(_)
        ));
    }

    #[test]
    fn test_only_network_errors_are_transient() {
        assert!(AuthError::Network("timeout".into()).is_transient());
        assert!(!AuthError::Expired.is_transient());
        assert!(!AuthError::Credential("nope".into()).is_transient());
    }
}
