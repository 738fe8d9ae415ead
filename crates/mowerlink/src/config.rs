//! Configuration types for authentication and the event stream.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MowerError, Result};

/// Default OAuth2 endpoint of the vendor authentication API.
pub const DEFAULT_AUTH_BASE_URL: &str = "https://api.authentication.husqvarnagroup.dev/v1";

/// Default websocket endpoint of the vendor event stream.
pub const DEFAULT_STREAM_URL: &str = "wss://ws.openapi.husqvarna.dev/v1";

/// Keep-alive tick interval in seconds.
pub const DEFAULT_KEEP_ALIVE_INTERVAL_SECS: u64 = 60;

/// Silence (or disconnection) after which a connection is presumed stale.
pub const DEFAULT_RECONNECT_THRESHOLD_SECS: u64 = 3600;

/// How the account authenticates against the vendor API.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum AuthMode {
    /// Resource-owner password grant (legacy accounts).
    Password { username: String, password: String },
    /// Client-credentials grant with an application secret.
    ClientCredentials { application_secret: String },
}

impl fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::ClientCredentials { .. } => f
                .debug_struct("ClientCredentials")
                .field("application_secret", &"<redacted>")
                .finish(),
        }
    }
}

/// Secrets required to obtain a credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSettings {
    /// Application key issued by the vendor developer portal.
    pub app_key: String,
    /// Grant used to log in.
    #[serde(flatten)]
    pub mode: AuthMode,
}

impl AuthSettings {
    /// Settings for the password grant.
    pub fn password(
        app_key: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            app_key: app_key.into(),
            mode: AuthMode::Password {
                username: username.into(),
                password: password.into(),
            },
        }
    }

    /// Settings for the client-credentials grant.
    pub fn client_credentials(
        app_key: impl Into<String>,
        application_secret: impl Into<String>,
    ) -> Self {
        Self {
            app_key: app_key.into(),
            mode: AuthMode::ClientCredentials {
                application_secret: application_secret.into(),
            },
        }
    }

    /// Check that every secret the configured strategy needs is present.
    pub fn validate(&self) -> Result<()> {
        require("app_key", &self.app_key)?;
        match &self.mode {
            AuthMode::Password { username, password } => {
                require("username", username)?;
                require("password", password)
            }
            AuthMode::ClientCredentials { application_secret } => {
                require("application_secret", application_secret)
            }
        }
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(MowerError::config(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Settings for the HTTP authenticator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpAuthenticatorConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for HttpAuthenticatorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_AUTH_BASE_URL.to_string(),
            timeout_secs: 10,
        }
    }
}

impl HttpAuthenticatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Settings for the resilient event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamConfig {
    /// Websocket endpoint.
    pub url: String,
    /// Seconds between keep-alive ticks.
    pub keep_alive_interval_secs: u64,
    /// Seconds of silence before a connection is considered stale.
    pub reconnect_threshold_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            keep_alive_interval_secs: DEFAULT_KEEP_ALIVE_INTERVAL_SECS,
            reconnect_threshold_secs: DEFAULT_RECONNECT_THRESHOLD_SECS,
        }
    }
}

impl StreamConfig {
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs)
    }

    pub fn reconnect_threshold(&self) -> Duration {
        Duration::from_secs(self.reconnect_threshold_secs)
    }

    /// Reject settings the keep-alive loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        require("url", &self.url)?;
        if self.keep_alive_interval_secs == 0 {
            return Err(MowerError::config("keep_alive_interval_secs must be at least 1"));
        }
        Ok(())
    }
}
