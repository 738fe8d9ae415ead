//! Error types shared by the credential and stream layers.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, MowerError>;

/// Errors that can occur while authenticating or streaming events.
#[derive(Debug, Error)]
pub enum MowerError {
    /// Required secrets are missing or empty.
    #[error("Bad configuration: {0}")]
    BadConfiguration(String),

    /// The account rejected the supplied username/password or client secret.
    #[error("Bad credentials")]
    BadCredentials,

    /// The account has been locked by the vendor.
    #[error("Account locked")]
    AccountLocked,

    /// Another session is already logged in with this account.
    #[error("Simultaneous login detected")]
    SimultaneousLogin,

    /// The bearer or refresh token is malformed or unknown.
    #[error("Bad token")]
    BadToken,

    /// A call made with the current credential was rejected.
    #[error("Not authorized")]
    NotAuthorized,

    /// The vendor answered with an error this crate does not classify.
    #[error("Unexpected server error {code}: {detail}")]
    UnexpectedServer { code: String, detail: String },

    /// Socket-level failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or unrecognized frame.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encode/decode error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MowerError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::BadConfiguration(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an unexpected server error from a vendor code/detail pair.
    pub fn unexpected(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::UnexpectedServer {
            code: code.into(),
            detail: detail.into(),
        }
    }

    /// Check if this error belongs to the authentication family.
    ///
    /// These are the errors that should invalidate the cached credential.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::BadCredentials
                | Self::AccountLocked
                | Self::SimultaneousLogin
                | Self::BadToken
                | Self::NotAuthorized
        )
    }

    /// Check if this error is a configuration problem that retrying cannot fix.
    #[inline]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::BadConfiguration(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for MowerError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
