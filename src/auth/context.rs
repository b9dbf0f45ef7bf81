//! Request-scoped authentication context.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use http::Extensions;
use http::request::Parts;
use tracing::warn;

use crate::auth::error::{AuthError, AuthResult};
use crate::auth::identity::Identity;
use crate::auth::token::Token;
use crate::error::ApiError;

/// The validated token and resolved identity of the current request.
///
/// Stored in the request extensions by the authenticated stage and read by
/// every later stage and handler. Nothing is shared across requests: each
/// request gets its own value, and it is never modified once attached.
#[derive(Debug, Clone)]
pub struct RequestContext {
    token: Arc<Token>,
    identity: Arc<Identity>,
}

impl RequestContext {
    pub fn new(token: Token, identity: Identity) -> Self {
        Self {
            token: Arc::new(token),
            identity: Arc::new(identity),
        }
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Store this context in `extensions`.
    ///
    /// Write-once: if a context is already attached it is kept and this one
    /// is discarded. Returns whether the value was stored.
    pub fn attach(self, extensions: &mut Extensions) -> bool {
        if extensions.get::<RequestContext>().is_some() {
            warn!("Request context already attached, keeping the first one");
            return false;
        }
        extensions.insert(self);
        true
    }

    /// The context attached to a request, or `Unauthorized` when the
    /// authenticated stage did not run.
    pub fn from_extensions(extensions: &Extensions) -> AuthResult<Self> {
        extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or(AuthError::Unauthorized)
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_extensions(&parts.extensions)?)
    }
}
