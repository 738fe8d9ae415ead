//! Credential management.
//!
//! # Architecture
//!
//! - [`Credential`]: immutable bearer token plus expiry
//! - [`Authenticator`]: login/refresh/logout capability
//! - [`CredentialManager`]: caching, renewal and invalidation policy
//! - [`CredentialSource`]: what the stream service needs from the manager
//! - [`HttpAuthenticator`]: authenticator for the vendor HTTP API

mod authenticator;
mod http;
mod manager;
mod types;

pub use authenticator::Authenticator;
pub use http::HttpAuthenticator;
pub use manager::{CredentialManager, CredentialSource};
pub use types::{Credential, EXPIRY_SAFETY_MARGIN, IssuedToken};
