use std::sync::Arc;

use anyhow::{Context, Result};
use mowerlink::{
    CredentialManager, EventStreamService, HttpAuthenticator, WebSocketTransport,
};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::ResolvedConfig;

type Manager = Arc<CredentialManager<HttpAuthenticator>>;

fn credential_manager(config: &ResolvedConfig) -> Result<Manager> {
    let authenticator = HttpAuthenticator::new(config.http.clone(), config.auth.app_key.clone())
        .context("Failed to build HTTP client")?;
    Ok(Arc::new(CredentialManager::new(
        config.auth.clone(),
        authenticator,
    )))
}

async fn logout(manager: &Manager) {
    if let Err(e) = manager.logout().await {
        warn!(error = %e, "Logout failed");
    }
}

/// Print one event as a JSON line on stdout.
fn print_event<T: Serialize>(kind: &str, event: &T) -> mowerlink::CallbackResult {
    let line = serde_json::json!({ "type": kind, "event": event });
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

/// Log in, print what was issued, log out.
pub async fn token(config: ResolvedConfig) -> Result<()> {
    let manager = credential_manager(&config)?;
    let credential = manager
        .get_current_credential()
        .await
        .context("Login failed")?;

    let valid_for = credential
        .expires_at
        .map(|at| at.saturating_duration_since(Instant::now()).as_secs());

    let summary = serde_json::json!({
        "provider": credential.provider,
        "user_id": credential.user_id,
        "valid_for_secs": valid_for,
        "refreshable": credential.refresh_token.is_some(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    logout(&manager).await;
    Ok(())
}

/// Follow the event stream until Ctrl-C.
pub async fn watch(
    mut config: ResolvedConfig,
    keep_alive_secs: Option<u64>,
    reconnect_threshold_secs: Option<u64>,
) -> Result<()> {
    if let Some(secs) = keep_alive_secs {
        config.stream.keep_alive_interval_secs = secs;
    }
    if let Some(secs) = reconnect_threshold_secs {
        config.stream.reconnect_threshold_secs = secs;
    }

    let manager = credential_manager(&config)?;
    let transport = WebSocketTransport::new(config.stream.url.clone());
    let service = EventStreamService::new(config.stream.clone(), transport, Arc::clone(&manager));

    service.on_connected(|event| {
        info!(connection_id = ?event.connection_id, "Connected");
        Ok(())
    });
    service.on_disconnected(|| {
        info!("Disconnected, reconnecting");
        Ok(())
    });
    service.on_error(|error| {
        warn!(error = %error, "Stream error");
        Ok(())
    });
    service.on_status(|event| print_event("status", event));
    service.on_settings(|event| print_event("settings", event));
    service.on_schedule(|event| print_event("schedule", event));

    service
        .start()
        .await
        .context("Failed to start event stream")?;
    info!(url = %config.stream.url, "Watching events, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down");
    service.stop().await;
    logout(&manager).await;
    Ok(())
}
