//! User directory (identity provider) access.
//!
//! The gateway never stores users itself. Every lookup or mutation goes to
//! the external directory through the [`UserDirectory`] trait; [`Auth0Directory`]
//! is the HTTP implementation.

mod auth0;
mod token_cache;

pub use auth0::Auth0Directory;
pub use token_cache::{ClientCredentials, ManagementTokenCache};

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::auth::{Identity, PermissionsMap, UserMetadata};
use crate::types::UserId;

/// Errors returned by directory calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The user does not exist
    NotFound,
    /// The directory refused our credential, even after a refresh
    Unauthorized,
    /// The directory denied the operation
    Forbidden,
    /// The directory rejected the payload (validation, conflict)
    Rejected(String),
    /// The request could not be built from the given input
    InvalidRequest(String),
    /// Timeout, transport failure or unexpected status
    Unavailable(String),
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "User not found"),
            Self::Unauthorized => write!(f, "Directory credential rejected"),
            Self::Forbidden => write!(f, "Directory denied the operation"),
            Self::Rejected(msg) => write!(f, "Directory rejected the request: {}", msg),
            Self::InvalidRequest(msg) => write!(f, "Invalid directory request: {}", msg),
            Self::Unavailable(msg) => write!(f, "Directory unavailable: {}", msg),
        }
    }
}

impl std::error::Error for DirectoryError {}

/// Result type for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Boxed future returned by [`UserDirectory`] methods.
pub type DirectoryFuture<'a, T> = Pin<Box<dyn Future<Output = DirectoryResult<T>> + Send + 'a>>;

/// The `app_metadata` section the gateway owns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    #[serde(default)]
    pub permissions: PermissionsMap,
}

/// Partial update of a directory user. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_metadata: Option<UserMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_metadata: Option<AppMetadata>,
}

impl UserPatch {
    /// Patch that persists the identity's permission map.
    pub fn permissions(permissions: PermissionsMap) -> Self {
        Self {
            app_metadata: Some(AppMetadata { permissions }),
            ..Default::default()
        }
    }
}

/// Authoritative store of user records.
pub trait UserDirectory: Send + Sync {
    /// Resolve the profile behind a bearer token.
    fn find_by_token<'a>(&'a self, token: &'a str) -> DirectoryFuture<'a, Identity>;

    fn find_by_id<'a>(&'a self, id: &'a UserId) -> DirectoryFuture<'a, Identity>;

    fn find_all(&self) -> DirectoryFuture<'_, Vec<Identity>>;

    /// Create a user; a password is generated when none is given.
    fn create<'a>(&'a self, email: &'a str, password: Option<&'a str>) -> DirectoryFuture<'a, Identity>;

    fn update<'a>(&'a self, id: &'a UserId, patch: &'a UserPatch) -> DirectoryFuture<'a, Identity>;

    fn delete_by_id<'a>(&'a self, id: &'a UserId) -> DirectoryFuture<'a, ()>;
}
