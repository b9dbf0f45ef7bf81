//! Management API credential, cached process-wide.
//!
//! A single slot holds the current `Authorization` value for directory calls.
//! Readers never wait while a token is cached; only callers that need a new
//! token queue behind the refresh gate, and whoever wins it fetches once for
//! everybody.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::directory::{DirectoryError, DirectoryResult};

/// Client-credentials grant parameters.
#[derive(Clone, Serialize)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub audience: String,
    pub grant_type: &'static str,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            audience: audience.into(),
            grant_type: "client_credentials",
        }
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("audience", &self.audience)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Single-slot cache of the management API token.
pub struct ManagementTokenCache {
    token_url: String,
    credentials: ClientCredentials,
    client: reqwest::Client,
    /// Current `"<type> <token>"` header value.
    slot: RwLock<Option<String>>,
    /// Serializes refreshes so concurrent misses fetch once.
    refresh_gate: Mutex<()>,
    fetches: AtomicU64,
}

impl ManagementTokenCache {
    pub fn new(token_url: impl Into<String>, credentials: ClientCredentials, client: reqwest::Client) -> Self {
        Self {
            token_url: token_url.into(),
            credentials,
            client,
            slot: RwLock::new(None),
            refresh_gate: Mutex::new(()),
            fetches: AtomicU64::new(0),
        }
    }

    /// The cached header value, fetching one if the slot is empty.
    pub async fn token(&self) -> DirectoryResult<String> {
        if let Some(token) = self.slot.read().await.clone() {
            return Ok(token);
        }
        self.refresh(None).await
    }

    /// Replace `stale` with a freshly issued token.
    ///
    /// If another caller already swapped the slot while this one waited on the
    /// gate, the newer token is returned without another fetch. With `stale`
    /// set to `None` any cached value counts as fresh.
    pub async fn refresh(&self, stale: Option<&str>) -> DirectoryResult<String> {
        let _gate = self.refresh_gate.lock().await;

        if let Some(current) = self.slot.read().await.clone()
            && stale != Some(current.as_str())
        {
            debug!("Management token already refreshed by another request");
            return Ok(current);
        }

        let fresh = self.fetch().await?;
        *self.slot.write().await = Some(fresh.clone());
        Ok(fresh)
    }

    /// Number of token-issuance calls made so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Drop the cached token.
    pub async fn clear(&self) {
        *self.slot.write().await = None;
    }

    async fn fetch(&self) -> DirectoryResult<String> {
        debug!("Requesting management token from {}", self.token_url);
        self.fetches.fetch_add(1, Ordering::Relaxed);

        let response = self
            .client
            .post(&self.token_url)
            .json(&self.credentials)
            .send()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            warn!(
                "Token endpoint {} answered HTTP {}",
                self.token_url,
                response.status()
            );
            return Err(DirectoryError::Unavailable(format!(
                "HTTP {} from token endpoint",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| DirectoryError::Unavailable(format!("Invalid token response: {}", e)))?;

        Ok(format!("{} {}", token.token_type, token.access_token))
    }
}
