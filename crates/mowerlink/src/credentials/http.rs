//! HTTP authenticator for the vendor OAuth2 API.
//!
//! - Login: password or client-credentials grant on `/oauth2/token`
//! - Refresh: refresh-token grant on the same endpoint, or the original grant
//!   again when no refresh token was issued (client credentials)
//! - Logout: `DELETE /token/{access_token}`

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::authenticator::Authenticator;
use super::types::{Credential, IssuedToken};
use crate::config::{AuthMode, AuthSettings, HttpAuthenticatorConfig};
use crate::error::{MowerError, Result};

const API_KEY_HEADER: &str = "X-Api-Key";
const PROVIDER_HEADER: &str = "Authorization-Provider";

/// Error body shapes the authentication API answers with.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorEntry>,
    /// OAuth2-style error code.
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

impl ErrorBody {
    /// First `(code, detail)` pair found in the body.
    fn code_and_detail(&self) -> (Option<String>, Option<String>) {
        if let Some(entry) = self.errors.first() {
            let detail = entry.detail.clone().or_else(|| entry.title.clone());
            return (entry.code.clone(), detail);
        }
        (self.error.clone(), self.error_description.clone())
    }
}

/// Map a rejected response to the error taxonomy.
fn classify_error(status: StatusCode, code: Option<&str>, detail: Option<&str>) -> MowerError {
    match code {
        Some(
            "invalid.credentials" | "user.password.invalid" | "invalid_grant" | "invalid_client",
        ) => MowerError::BadCredentials,
        Some("user.is.blocked" | "account.locked") => MowerError::AccountLocked,
        Some("simultaneous.logins" | "user.simultaneous.login") => MowerError::SimultaneousLogin,
        Some("invalid.token" | "token.not.found" | "invalid_token") => MowerError::BadToken,
        _ if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
            MowerError::NotAuthorized
        }
        _ => MowerError::unexpected(
            code.map(str::to_string)
                .unwrap_or_else(|| status.as_u16().to_string()),
            detail.unwrap_or("no detail provided"),
        ),
    }
}

/// [`Authenticator`] backed by the vendor HTTP API.
pub struct HttpAuthenticator {
    client: Client,
    config: HttpAuthenticatorConfig,
    app_key: String,
}

impl HttpAuthenticator {
    /// Create an authenticator with its own HTTP client.
    pub fn new(config: HttpAuthenticatorConfig, app_key: impl Into<String>) -> Result<Self> {
        crate::tls::install_rustls_provider();
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self::with_client(client, config, app_key))
    }

    /// Create an authenticator sharing an existing HTTP client.
    pub fn with_client(
        client: Client,
        config: HttpAuthenticatorConfig,
        app_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            config,
            app_key: app_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<IssuedToken> {
        let response = self
            .client
            .post(self.url("/oauth2/token"))
            .header(API_KEY_HEADER, &self.app_key)
            .form(form)
            .send()
            .await?;

        let response = check_status(response).await?;
        Ok(response.json::<IssuedToken>().await?)
    }
}

/// Turn non-success responses into classified errors.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let (code, detail) = body.code_and_detail();
    let error = classify_error(status, code.as_deref(), detail.as_deref());
    debug!(%status, ?code, error = %error, "Authentication API rejected request");
    Err(error)
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    #[instrument(skip_all)]
    async fn authenticate(&self, settings: &AuthSettings) -> Result<IssuedToken> {
        match &settings.mode {
            AuthMode::Password { username, password } => {
                self.request_token(&[
                    ("grant_type", "password"),
                    ("client_id", settings.app_key.as_str()),
                    ("username", username.as_str()),
                    ("password", password.as_str()),
                ])
                .await
            }
            AuthMode::ClientCredentials { application_secret } => {
                self.request_token(&[
                    ("grant_type", "client_credentials"),
                    ("client_id", settings.app_key.as_str()),
                    ("client_secret", application_secret.as_str()),
                ])
                .await
            }
        }
    }

    #[instrument(skip_all)]
    async fn refresh(
        &self,
        settings: &AuthSettings,
        credential: &Credential,
    ) -> Result<IssuedToken> {
        let Some(refresh_token) = credential.refresh_token.as_deref() else {
            debug!("Credential carries no refresh token, requesting a new grant");
            return self.authenticate(settings).await;
        };

        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("client_id", self.app_key.as_str()),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    #[instrument(skip_all)]
    async fn logout(&self, credential: &Credential) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/token/{}", credential.access_token)))
            .header(API_KEY_HEADER, &self.app_key)
            .header(PROVIDER_HEADER, &credential.provider)
            .send()
            .await?;

        check_status(response).await?;
        Ok(())
    }
}
