//! REST client module for the auth endpoints.
//!
//! This module provides the `AuthApi` trait consumed by the session manager
//! and `HttpAuthApi`, its `reqwest` implementation. The endpoints issue a
//! bearer access token plus a refresh token; verification of either is the
//! server's job.

pub mod client;
pub mod error;
pub mod models;

pub use client::{AuthApi, HttpAuthApi};
pub use error::ApiError;
pub use models::{LoginResponse, TokenPair, User};
