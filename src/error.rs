//! Error body returned to HTTP callers.

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::Serialize;
use tracing::error;

use crate::auth::AuthError;
use crate::directory::DirectoryError;

/// `{statusCode, errorCode, message}` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub status_code: u16,
    pub error_code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, error_code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            error_code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self::new(err.status_code(), err.error_code(), err.public_message())
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound => Self::new(StatusCode::NOT_FOUND, "not_found", "User not found"),
            DirectoryError::Forbidden => {
                Self::new(StatusCode::FORBIDDEN, "forbidden", "The directory denied the operation")
            }
            DirectoryError::Rejected(msg) => Self::new(StatusCode::UNPROCESSABLE_ENTITY, "rejected", msg),
            DirectoryError::InvalidRequest(msg) => Self::bad_request(msg),
            DirectoryError::Unauthorized => {
                error!("Directory credential rejected after refresh");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "The gateway could not authenticate with the directory",
                )
            }
            DirectoryError::Unavailable(msg) => {
                error!("Directory unavailable: {}", msg);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "directory_unavailable",
                    "The identity directory is currently unavailable",
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}
