//! User management handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use tracing::info;

use super::AppState;
use crate::auth::{AuthError, Profile, RequestContext, UserMetadata};
use crate::directory::UserPatch;
use crate::error::ApiError;
use crate::types::UserId;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub blocked: Option<bool>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, alias = "userMetadata")]
    pub user_metadata: Option<UserMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    #[serde(default)]
    pub role: String,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

pub async fn profile(State(state): State<AppState>, context: RequestContext) -> Json<Profile> {
    Json(context.identity().to_profile(state.gate.permissions().tenant()))
}

pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<Profile>>, ApiError> {
    let tenant = state.gate.permissions().tenant();
    let users = state.directory.find_all().await?;
    Ok(Json(users.iter().map(|u| u.to_profile(tenant)).collect()))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<Json<Profile>, ApiError> {
    let identity = state.directory.find_by_id(&id).await?;
    Ok(Json(identity.to_profile(state.gate.permissions().tenant())))
}

pub async fn create_user(
    State(state): State<AppState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Profile>), ApiError> {
    let request = body(payload)?;
    if request.email.is_empty() {
        return Err(ApiError::bad_request("email is required"));
    }

    let identity = state
        .directory
        .create(&request.email, request.password.as_deref())
        .await?;
    info!("Created user {}", identity.id);

    Ok((
        StatusCode::CREATED,
        Json(identity.to_profile(state.gate.permissions().tenant())),
    ))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<Profile>, ApiError> {
    let request = body(payload)?;
    let patch = UserPatch {
        blocked: request.blocked,
        email: request.email,
        password: request.password,
        user_metadata: request.user_metadata,
        app_metadata: None,
    };

    let identity = state.directory.update(&id, &patch).await?;
    Ok(Json(identity.to_profile(state.gate.permissions().tenant())))
}

/// Change the active tenant's role of a user and persist it.
pub async fn update_role(
    State(state): State<AppState>,
    context: RequestContext,
    Path(id): Path<UserId>,
    payload: Result<Json<UpdateRoleRequest>, JsonRejection>,
) -> Result<Json<Profile>, ApiError> {
    let request = body(payload)?;
    let permissions = state.gate.permissions();

    let mut identity = state.directory.find_by_id(&id).await?;
    permissions.update_role(&mut identity, &request.role);

    let patch = UserPatch::permissions(identity.permissions.clone());
    let updated = state.directory.update(&id, &patch).await?;

    info!(
        "{} set role of {} to {}",
        context.identity().id,
        id,
        permissions.role(&updated)
    );
    Ok(Json(updated.to_profile(permissions.tenant())))
}

pub async fn delete_user(
    State(state): State<AppState>,
    context: RequestContext,
    Path(id): Path<UserId>,
) -> Result<StatusCode, ApiError> {
    let id = UserId::from_subject(id.as_str());
    if context.identity().id == id {
        return Err(AuthError::Forbidden.into());
    }

    state.directory.delete_by_id(&id).await?;
    info!("{} deleted user {}", context.identity().id, id);
    Ok(StatusCode::NO_CONTENT)
}
