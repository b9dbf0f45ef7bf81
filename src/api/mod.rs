// REST API for the gateway

mod users;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::middleware::from_fn_with_state;
use axum::{
    Router,
    http::{HeaderValue, Method, StatusCode},
    response::Json,
    routing::{delete, get, patch, post, put},
};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{AuthGate, guard};
use crate::directory::UserDirectory;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AuthGate>,
    pub directory: Arc<dyn UserDirectory>,
}

impl AppState {
    pub fn new(gate: Arc<AuthGate>, directory: Arc<dyn UserDirectory>) -> Self {
        Self { gate, directory }
    }
}

pub fn create_router(state: AppState, cors: CorsLayer) -> Router {
    let gate = state.gate.clone();
    let authenticated = || from_fn_with_state(gate.clone(), guard::authenticated);
    let consultant = || from_fn_with_state(gate.clone(), guard::consultant);
    let supervisor = || from_fn_with_state(gate.clone(), guard::supervisor);
    let admin = || from_fn_with_state(gate.clone(), guard::admin);

    // Role stages are added before the authenticated stage so they run after it.
    let collection = get(users::list_users)
        .route_layer(supervisor())
        .merge(post(users::create_user).route_layer(admin()))
        .route_layer(authenticated());

    let member = get(users::get_user)
        .route_layer(consultant())
        .merge(patch(users::update_user).route_layer(admin()))
        .merge(delete(users::delete_user).route_layer(admin()))
        .route_layer(authenticated());

    let role = put(users::update_role)
        .route_layer(admin())
        .route_layer(authenticated());

    let profile = get(users::profile).route_layer(authenticated());

    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/users", collection)
        .route("/api/v1/users/profile", profile)
        .route("/api/v1/users/{id}", member)
        .route("/api/v1/users/{id}/role", role)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// CORS policy: any origin in development, the configured list in production.
pub fn cors_layer(production: bool, allowed_origins: &[String]) -> Result<CorsLayer> {
    if !production {
        return Ok(CorsLayer::very_permissive());
    }

    let origins = allowed_origins
        .iter()
        .map(|o| HeaderValue::from_str(o).with_context(|| format!("Invalid CORS origin `{}`", o)))
        .collect::<Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
