//! Wire models for the auth endpoints.
//!
//! The backend is inconsistent about field naming (`first_name` vs
//! `firstName`, `token` vs `accessToken`, numeric vs string ids). All of
//! that is normalized here so nothing past this module needs to care.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical user record as returned by `/auth/login` and `/auth/profile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct User {
    pub id: String,
    pub role: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl User {
    /// Name for display, falling back to the email address.
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => self.email.clone().unwrap_or_else(|| self.id.clone()),
        }
    }
}

impl TryFrom<Value> for User {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        // Profile responses are sometimes wrapped as {"user": {...}}
        let obj = match value.get("user") {
            Some(Value::Object(inner)) => inner,
            _ => value.as_object().ok_or("user must be a JSON object")?,
        };

        let id = pick_id(obj, &["id", "_id", "userId", "user_id"])
            .ok_or("user is missing an id")?;

        Ok(Self {
            id,
            role: pick_str(obj, &["role", "userRole", "user_role"]),
            email: pick_str(obj, &["email"]),
            first_name: pick_str(obj, &["first_name", "firstName"]),
            last_name: pick_str(obj, &["last_name", "lastName"]),
        })
    }
}

/// Successful `/auth/login` body.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(rename = "token", alias = "accessToken", alias = "access_token")]
    pub access_token: String,
    #[serde(rename = "refreshToken", alias = "refresh_token")]
    pub refresh_token: String,
    pub user: User,
}

/// Successful `/auth/refresh` body. Some deployments do not rotate the
/// refresh token, in which case the previous one stays valid.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPair {
    #[serde(rename = "accessToken", alias = "token", alias = "access_token")]
    pub access_token: String,
    #[serde(rename = "refreshToken", alias = "refresh_token", default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct RefreshRequest<'a> {
    #[serde(rename = "refreshToken")]
    pub refresh_token: &'a str,
}

/// First non-empty string among `keys`.
pub(crate) fn pick_str(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .filter_map(|v| v.as_str())
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// First id-like value among `keys`, accepting strings or integers.
pub(crate) fn pick_id(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().filter_map(|k| obj.get(*k)).find_map(|v| match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
