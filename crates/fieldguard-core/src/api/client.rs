//! HTTP client for the field-service auth endpoints.
//!
//! `AuthApi` is the seam the session manager talks through; `HttpAuthApi`
//! is the production implementation over `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::models::{LoginRequest, LoginResponse, RefreshRequest, TokenPair, User};
use super::ApiError;
use crate::config::PortalConfig;

/// The token-issuing API, consumed but not implemented here.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// `POST /auth/login`
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError>;

    /// `POST /auth/refresh`
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError>;

    /// `POST /auth/logout`, best-effort.
    async fn logout(&self, access_token: &str) -> Result<(), ApiError>;

    /// `GET /auth/profile` with bearer auth.
    async fn profile(&self, access_token: &str) -> Result<User, ApiError>;
}

/// API client for the auth endpoints.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpAuthApi {
    client: Client,
    base_url: String,
}

impl HttpAuthApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &PortalConfig) -> Result<Self, ApiError> {
        Self::new(
            &config.api_base_url,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("{} response: {}", what, e)))
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        debug!(email = email, "Sending login request");
        let response = self
            .client
            .post(self.url("/auth/login"))
            .header(header::ACCEPT, "application/json")
            .json(&LoginRequest { email, password })
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse(response, "login").await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        debug!("Sending token refresh request");
        let response = self
            .client
            .post(self.url("/auth/refresh"))
            .header(header::ACCEPT, "application/json")
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse(response, "refresh").await
    }

    async fn logout(&self, access_token: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url("/auth/logout"))
            .bearer_auth(access_token)
            .send()
            .await?;

        Self::check_response(response).await?;
        Ok(())
    }

    async fn profile(&self, access_token: &str) -> Result<User, ApiError> {
        let response = self
            .client
            .get(self.url("/auth/profile"))
            .header(header::ACCEPT, "application/json")
            .bearer_auth(access_token)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse(response, "profile").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let api = HttpAuthApi::new("https://api.example.com/", Duration::from_secs(5)).unwrap();
        assert_eq!(api.url("/auth/login"), "https://api.example.com/auth/login");
    }
}
