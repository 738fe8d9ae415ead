//! Credential value objects.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Credentials are treated as expired this long before the vendor revokes them.
pub const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(60 * 60);

/// Token payload returned by an [`Authenticator`](super::Authenticator).
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuedToken {
    pub access_token: String,
    /// Authorization provider the token belongs to (e.g. "husqvarna").
    #[serde(default)]
    pub provider: String,
    /// Lifetime in seconds, as announced by the server.
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl IssuedToken {
    pub fn new(access_token: impl Into<String>, expires_in: Option<u64>) -> Self {
        Self {
            access_token: access_token.into(),
            provider: String::new(),
            expires_in,
            refresh_token: None,
            user_id: None,
        }
    }
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("access_token", &"<redacted>")
            .field("provider", &self.provider)
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Bearer credential handed out by the credential manager.
///
/// Immutable once issued. A renewal produces a new value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub provider: String,
    pub user_id: Option<String>,
    pub refresh_token: Option<String>,
    /// Instant after which the credential must be renewed. `None` means no known expiry.
    pub expires_at: Option<Instant>,
}

impl Credential {
    /// Build a credential from a freshly issued token.
    ///
    /// Expiry is `issued_at + expires_in - EXPIRY_SAFETY_MARGIN`, so a token that lives
    /// for an hour or less is already expired when issued.
    pub fn from_issued(token: IssuedToken, issued_at: Instant) -> Self {
        let expires_at = token.expires_in.map(|secs| {
            issued_at + Duration::from_secs(secs).saturating_sub(EXPIRY_SAFETY_MARGIN)
        });

        Self {
            access_token: token.access_token,
            provider: token.provider,
            user_id: token.user_id,
            refresh_token: token.refresh_token,
            expires_at,
        }
    }

    /// Check whether the credential must be renewed at `now`.
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    /// Check whether the credential must be renewed now.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Value of the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("provider", &self.provider)
            .field("user_id", &self.user_id)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
