//! Authenticator capability consumed by the credential manager.

use std::sync::Arc;

use async_trait::async_trait;

use super::types::{Credential, IssuedToken};
use crate::config::AuthSettings;
use crate::error::Result;

/// Login, refresh and logout against the vendor authentication API.
///
/// Implementations report rejections with the authentication family of
/// [`MowerError`](crate::MowerError) so callers can tell them apart from
/// transient failures.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Perform a full login with the configured secrets.
    async fn authenticate(&self, settings: &AuthSettings) -> Result<IssuedToken>;

    /// Renew an existing credential.
    ///
    /// The settings are passed along for grants that cannot be refreshed and
    /// have to be issued again.
    async fn refresh(
        &self,
        settings: &AuthSettings,
        credential: &Credential,
    ) -> Result<IssuedToken>;

    /// Revoke a credential on the server.
    async fn logout(&self, credential: &Credential) -> Result<()>;
}

#[async_trait]
impl<A: Authenticator + ?Sized> Authenticator for Arc<A> {
    async fn authenticate(&self, settings: &AuthSettings) -> Result<IssuedToken> {
        (**self).authenticate(settings).await
    }

    async fn refresh(
        &self,
        settings: &AuthSettings,
        credential: &Credential,
    ) -> Result<IssuedToken> {
        (**self).refresh(settings, credential).await
    }

    async fn logout(&self, credential: &Credential) -> Result<()> {
        (**self).logout(credential).await
    }
}
