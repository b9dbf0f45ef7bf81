//! Identity resolution from a validated token.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::error::{AuthError, AuthResult};
use crate::auth::identity::Identity;
use crate::auth::token::Token;
use crate::directory::{DirectoryError, UserDirectory};
use crate::types::UserId;

/// Profile claims carried by self-contained tokens.
#[derive(Debug, Deserialize)]
struct TokenProfile {
    #[serde(default)]
    sub: String,
    #[serde(default)]
    nickname: String,
    #[serde(default)]
    picture: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    email_verified: bool,
}

enum Strategy {
    Claims,
    Directory {
        directory: Arc<dyn UserDirectory>,
        timeout: Duration,
    },
}

/// Turns a validated [`Token`] into an [`Identity`].
pub struct IdentityResolver {
    strategy: Strategy,
}

impl IdentityResolver {
    /// Decode the profile straight from the token claims.
    pub fn from_claims() -> Self {
        Self {
            strategy: Strategy::Claims,
        }
    }

    /// Look the token up in the directory, bounded by `timeout`.
    pub fn from_directory(directory: Arc<dyn UserDirectory>, timeout: Duration) -> Self {
        Self {
            strategy: Strategy::Directory { directory, timeout },
        }
    }

    pub fn is_directory_backed(&self) -> bool {
        matches!(self.strategy, Strategy::Directory { .. })
    }

    pub async fn resolve_from_token(&self, token: &Token) -> AuthResult<Identity> {
        let identity = match &self.strategy {
            Strategy::Claims => identity_from_claims(token)?,
            Strategy::Directory { directory, timeout } => {
                lookup(directory.as_ref(), token.raw(), *timeout).await?
            }
        };

        if !identity.is_resolved() {
            return Err(AuthError::InvalidToken("token carries no subject".to_string()));
        }
        Ok(identity)
    }
}

fn identity_from_claims(token: &Token) -> AuthResult<Identity> {
    let profile: TokenProfile = serde_json::from_value(Value::Object(token.claims().clone()))
        .map_err(|e| AuthError::InvalidToken(format!("Invalid profile claims: {}", e)))?;

    Ok(Identity {
        id: UserId::from_subject(&profile.sub),
        nickname: profile.nickname,
        picture: profile.picture,
        email: profile.email,
        email_verified: profile.email_verified,
        ..Default::default()
    })
}

async fn lookup(directory: &dyn UserDirectory, raw: &str, timeout: Duration) -> AuthResult<Identity> {
    match tokio::time::timeout(timeout, directory.find_by_token(raw)).await {
        Ok(Ok(identity)) => {
            debug!("Directory resolved identity {}", identity.id);
            Ok(identity)
        }
        Ok(Err(DirectoryError::Unavailable(msg))) => {
            warn!("Directory lookup failed: {}", msg);
            Err(AuthError::DirectoryUnavailable(msg))
        }
        Ok(Err(err)) => Err(AuthError::InvalidToken(err.to_string())),
        Err(_) => {
            warn!("Directory lookup timed out after {:?}", timeout);
            Err(AuthError::DirectoryUnavailable(format!(
                "lookup timed out after {:?}",
                timeout
            )))
        }
    }
}
