//! # mowerlink
//!
//! Cloud integration for robotic lawn mowers.
//!
//! The crate keeps a bearer credential valid against the vendor authentication
//! API and maintains one long-lived event stream that survives silent socket
//! death, token expiry and server-side disconnects.
//!
//! ## Layers
//!
//! - [`credentials`]: login, refresh, invalidation and logout
//! - [`stream`]: transport, keep-alive/reconnect loop, frame dispatch
//! - [`config`]: settings for both layers

pub mod config;
pub mod credentials;
pub mod error;
pub mod stream;
mod tls;

#[cfg(test)]
mod test_support;

pub use config::{AuthMode, AuthSettings, HttpAuthenticatorConfig, StreamConfig};
pub use credentials::{
    Authenticator, Credential, CredentialManager, CredentialSource, HttpAuthenticator, IssuedToken,
};
pub use error::{MowerError, Result};
pub use stream::{
    CallbackResult, ConnectionState, EventStreamService, ScheduleEvent, SettingsEvent,
    StatusEvent, StreamTransport, TransportSignal, TransportSignals, WebSocketTransport,
};
pub use tls::install_rustls_provider;
