//! HTTP server wiring.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tracing::{info, warn};

use crate::api::{AppState, cors_layer, create_router};
use crate::auth::{AuthGate, IdentityResolver, PermissionResolver, TokenCodec};
use crate::config::{GatewayConfig, IdentitySource};
use crate::directory::{Auth0Directory, UserDirectory};

/// Build the shared state from configuration.
pub fn build_state(config: &GatewayConfig) -> Result<AppState> {
    let permissions = PermissionResolver::from_config(&config.auth);

    if config.directory.client_id.is_empty() || config.directory.client_secret.is_empty() {
        warn!("Directory management credentials are not configured; user management calls will fail");
    }
    let directory: Arc<dyn UserDirectory> = Arc::new(
        Auth0Directory::new(&config.directory, permissions.clone())
            .context("Failed to create directory client")?,
    );

    let mut codec = TokenCodec::hs256(&config.auth.signing_secret);
    if let Some(audience) = &config.auth.audience {
        codec = codec.with_audience(audience);
    }

    let identities = match config.auth.identity_source {
        IdentitySource::Claims => IdentityResolver::from_claims(),
        IdentitySource::Directory => {
            IdentityResolver::from_directory(directory.clone(), config.directory.timeout)
        }
    };

    info!(
        "Auth tenant `{}`, identities from {:?}",
        permissions.tenant(),
        config.auth.identity_source
    );

    let gate = AuthGate::new(codec, identities, permissions);
    Ok(AppState::new(Arc::new(gate), directory))
}

/// Build the full router for `config`.
pub fn create_app(config: &GatewayConfig) -> Result<Router> {
    let state = build_state(config)?;
    let cors = cors_layer(config.production, &config.cors_allowed_origins)?;
    Ok(create_router(state, cors))
}

/// Serve until Ctrl-C.
pub async fn serve(config: &GatewayConfig, addr: SocketAddr) -> Result<()> {
    let app = create_app(config)?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Gateway listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
