//! Bearer credential lifecycle.
//!
//! The manager caches the current credential, renews it when it expires and
//! forces a full login after a consumer reports it as rejected.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::authenticator::Authenticator;
use super::types::{Credential, IssuedToken};
use crate::config::AuthSettings;
use crate::error::Result;

/// Anything that can hand out a usable credential.
///
/// The stream service only depends on this trait, not on the manager itself.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Return a usable credential, renewing it if needed.
    async fn get_current_credential(&self) -> Result<Arc<Credential>>;

    /// Report that a call made with the current credential was rejected.
    fn flag_as_invalid(&self);
}

#[async_trait]
impl<S: CredentialSource + ?Sized> CredentialSource for Arc<S> {
    async fn get_current_credential(&self) -> Result<Arc<Credential>> {
        (**self).get_current_credential().await
    }

    fn flag_as_invalid(&self) {
        (**self).flag_as_invalid()
    }
}

/// Why a new credential is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Renewal {
    FirstLogin,
    Invalidated,
    Expired,
}

/// Owns acquisition, caching, renewal, invalidation and teardown of the credential.
pub struct CredentialManager<A> {
    settings: AuthSettings,
    authenticator: A,
    /// Cached credential. The lock also serializes renewals.
    current: Mutex<Option<Arc<Credential>>>,
    invalidated: AtomicBool,
}

impl<A: Authenticator> CredentialManager<A> {
    /// Create a manager. Nothing is fetched until the first call.
    pub fn new(settings: AuthSettings, authenticator: A) -> Self {
        Self {
            settings,
            authenticator,
            current: Mutex::new(None),
            invalidated: AtomicBool::new(false),
        }
    }

    /// Access the underlying authenticator.
    pub fn authenticator(&self) -> &A {
        &self.authenticator
    }

    /// Return a usable credential.
    ///
    /// Performs a full login when nothing is cached or the credential was flagged
    /// invalid, refreshes when the cached one expired, and otherwise returns the
    /// cached instance unchanged. Authenticator errors propagate as is.
    #[instrument(skip(self))]
    pub async fn get_current_credential(&self) -> Result<Arc<Credential>> {
        let mut current = self.current.lock().await;

        let renewal = match current.as_ref() {
            None => Renewal::FirstLogin,
            Some(_) if self.invalidated.load(Ordering::SeqCst) => Renewal::Invalidated,
            Some(credential) if credential.is_expired() => Renewal::Expired,
            Some(credential) => return Ok(Arc::clone(credential)),
        };

        let issued = match (renewal, current.as_ref()) {
            (Renewal::Expired, Some(credential)) => {
                info!("Credential expired, refreshing");
                self.authenticator.refresh(&self.settings, credential).await?
            }
            _ => {
                if renewal == Renewal::Invalidated {
                    info!("Credential flagged invalid, performing full login");
                } else {
                    debug!("No cached credential, performing login");
                }
                self.login().await?
            }
        };

        let credential = Arc::new(Credential::from_issued(issued, Instant::now()));
        self.invalidated.store(false, Ordering::SeqCst);
        debug!(
            provider = %credential.provider,
            expires_at = ?credential.expires_at,
            "Credential issued"
        );

        *current = Some(Arc::clone(&credential));
        Ok(credential)
    }

    /// Mark the cached credential as rejected. The next call to
    /// [`get_current_credential`](Self::get_current_credential) logs in from scratch.
    pub fn flag_as_invalid(&self) {
        if !self.invalidated.swap(true, Ordering::SeqCst) {
            debug!("Credential flagged as invalid");
        }
    }

    /// Whether the invalidation flag is currently set.
    pub fn is_flagged_invalid(&self) -> bool {
        self.invalidated.load(Ordering::SeqCst)
    }

    /// Revoke the cached credential, if any.
    ///
    /// The local cache is cleared even when the remote call fails; the error is
    /// still returned to the caller.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<()> {
        let Some(credential) = self.current.lock().await.take() else {
            debug!("Logout requested without a cached credential");
            return Ok(());
        };

        match self.authenticator.logout(&credential).await {
            Ok(()) => {
                info!("Logged out");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Remote logout failed, local credential discarded anyway");
                Err(e)
            }
        }
    }

    async fn login(&self) -> Result<IssuedToken> {
        self.settings.validate()?;
        self.authenticator.authenticate(&self.settings).await
    }
}

#[async_trait]
impl<A: Authenticator> CredentialSource for CredentialManager<A> {
    async fn get_current_credential(&self) -> Result<Arc<Credential>> {
        CredentialManager::get_current_credential(self).await
    }

    fn flag_as_invalid(&self) {
        CredentialManager::flag_as_invalid(self)
    }
}
