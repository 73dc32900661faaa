//! Authentication module for managing portal sessions and tokens.
//!
//! This module provides:
//! - `TokenStore`: namespaced persistence of the access/refresh token pair
//! - `TokenCodec`: unverified decoding of access-token claims
//! - `SessionManager`: restore, login, logout, refresh and expiry handling
//!
//! Sessions are restored from storage on startup and end as soon as the
//! access token is seen to be expired.

pub mod clock;
pub mod codec;
pub mod identity;
pub mod session;
pub mod state;
pub mod token_store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{Claims, DecodeError, TokenCodec};
pub use identity::Identity;
pub use session::{SessionManager, SessionSnapshot, SubscriptionId};
pub use state::{Listener, SessionEvent, SessionState, TransitionCause, TransitionLogger};
pub use token_store::{
    Credential, FileBackend, KeyValueBackend, KeyringBackend, MemoryBackend, StorageError,
    TokenStore,
};
