//! Configuration file loading and merging with command line arguments.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use mowerlink::{AuthSettings, HttpAuthenticatorConfig, StreamConfig};
use serde::Deserialize;
use tracing::debug;

use crate::cli::Args;

/// Contents of the optional TOML configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub app_key: Option<String>,
    pub app_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub auth: HttpAuthenticatorConfig,
    pub stream: StreamConfig,
}

impl FileConfig {
    /// Default location: `<config dir>/mowerlink/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mowerlink").join("config.toml"))
    }

    /// Load the file at `path`, or the default location if it exists.
    ///
    /// An explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        debug!(path = %path.display(), "Loading configuration file");
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// Everything the commands need, after flags have overridden the file.
#[derive(Debug)]
pub struct ResolvedConfig {
    pub auth: AuthSettings,
    pub http: HttpAuthenticatorConfig,
    pub stream: StreamConfig,
}

impl ResolvedConfig {
    pub fn resolve(file: FileConfig, args: &Args) -> Result<Self> {
        let pick = |flag: &Option<String>, file: Option<String>| flag.clone().or(file);

        let app_key = pick(&args.app_key, file.app_key).unwrap_or_default();
        let app_secret = pick(&args.app_secret, file.app_secret);
        let username = pick(&args.username, file.username);
        let password = pick(&args.password, file.password);

        let auth = match (app_secret, username, password) {
            (Some(secret), _, _) => AuthSettings::client_credentials(app_key, secret),
            (None, Some(username), Some(password)) => {
                AuthSettings::password(app_key, username, password)
            }
            (None, Some(_), None) => bail!("A password is required together with --username"),
            _ => bail!("Provide --app-secret, or --username and --password"),
        };

        let mut http = file.auth;
        if let Some(url) = &args.auth_url {
            http.base_url = url.clone();
        }

        let mut stream = file.stream;
        if let Some(url) = &args.stream_url {
            stream.url = url.clone();
        }

        Ok(Self { auth, http, stream })
    }
}
