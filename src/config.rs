//! Process configuration, read once at startup.
//!
//! Values come from the environment after optional env files have been
//! loaded. Nothing here changes after [`GatewayConfig::from_env`] returns.

use std::path::Path;
use std::time::Duration;
use std::{env, fmt};

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use tracing::{debug, info};

use crate::types::{RoleName, TenantId};

/// Default port when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 3008;

/// Default timeout for outbound directory calls.
pub const DEFAULT_DIRECTORY_TIMEOUT_SECONDS: u64 = 10;

/// base64url with optional padding, as the signing secret is stored.
const SECRET_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &base64::alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// How a validated token is turned into an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentitySource {
    /// Decode the profile embedded in the token claims
    #[default]
    Claims,
    /// Look the token up in the user directory
    Directory,
}

impl std::str::FromStr for IdentitySource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claims" | "" => Ok(Self::Claims),
            "directory" => Ok(Self::Directory),
            other => Err(anyhow!(
                "Unknown identity source `{}` (expected `claims` or `directory`)",
                other
            )),
        }
    }
}

/// Role names configured for the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleConfig {
    /// Role synthesized when an identity has no record for the active tenant
    pub default_unauthorized: RoleName,
    /// Role applied by `update_role` when no role is given
    pub default_role: RoleName,
    pub consultant: RoleName,
    pub supervisor: RoleName,
    pub admin: RoleName,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            default_unauthorized: RoleName::new("unauthorized"),
            default_role: RoleName::new("participant"),
            consultant: RoleName::new("consultant"),
            supervisor: RoleName::new("supervisor"),
            admin: RoleName::new("admin"),
        }
    }
}

/// Authentication settings.
#[derive(Clone)]
pub struct AuthConfig {
    /// Active tenant for this deployment
    pub tenant: TenantId,
    pub roles: RoleConfig,
    /// Decoded HS256 signing secret
    pub signing_secret: Vec<u8>,
    /// Expected `aud` claim; audience is not checked when unset
    pub audience: Option<String>,
    pub identity_source: IdentitySource,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("tenant", &self.tenant)
            .field("roles", &self.roles)
            .field("signing_secret", &"<redacted>")
            .field("audience", &self.audience)
            .field("identity_source", &self.identity_source)
            .finish()
    }
}

impl AuthConfig {
    /// Config for a tenant with default role names and the given raw secret.
    pub fn new(tenant: impl Into<TenantId>, signing_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            tenant: tenant.into(),
            roles: RoleConfig::default(),
            signing_secret: signing_secret.into(),
            audience: None,
            identity_source: IdentitySource::Claims,
        }
    }
}

/// Settings for the user directory (Auth0 Management API).
#[derive(Clone)]
pub struct DirectoryConfig {
    /// Base URL, e.g. `https://tenant.auth0.com`
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Management API audience
    pub audience: String,
    pub timeout: Duration,
}

impl fmt::Debug for DirectoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("audience", &self.audience)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl DirectoryConfig {
    /// Config pointing at `base_url` with the default management audience.
    pub fn new(base_url: impl Into<String>, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            audience: format!("{}/api/v2/", base_url),
            base_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            timeout: Duration::from_secs(DEFAULT_DIRECTORY_TIMEOUT_SECONDS),
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// `APP_ENV=prod`
    pub production: bool,
    pub port: u16,
    pub auth: AuthConfig,
    pub directory: DirectoryConfig,
    /// Allowed CORS origins in production; development allows any origin
    pub cors_allowed_origins: Vec<String>,
}

impl GatewayConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let require = |key: &str| get(key).ok_or_else(|| anyhow!("Missing required setting `{}`", key));

        let production = get("APP_ENV").as_deref() == Some("prod");

        let port = match get("PORT") {
            Some(p) => p.parse().with_context(|| format!("Invalid PORT `{}`", p))?,
            None => DEFAULT_PORT,
        };

        let defaults = RoleConfig::default();
        let role = |key: &str, fallback: &RoleName| {
            get(key).map(RoleName::from).unwrap_or_else(|| fallback.clone())
        };
        let roles = RoleConfig {
            default_unauthorized: role("AUTH_DEFAULT_UNAUTHORIZED", &defaults.default_unauthorized),
            default_role: role("AUTH_DEFAULT_ROLE", &defaults.default_role),
            consultant: role("AUTH_ROLE_CONSULTANT", &defaults.consultant),
            supervisor: role("AUTH_ROLE_SUPERVISOR", &defaults.supervisor),
            admin: role("AUTH_ROLE_ADMIN", &defaults.admin),
        };

        let signing_secret = decode_signing_secret(&require("AUTH0_CLIENT_SECRET")?)?;

        let identity_source = match get("AUTH_IDENTITY_SOURCE") {
            Some(s) => s.parse()?,
            None => IdentitySource::default(),
        };

        let auth = AuthConfig {
            tenant: TenantId::new(require("AUTH_TENANT")?),
            roles,
            signing_secret,
            audience: get("AUTH0_CLIENT_ID"),
            identity_source,
        };

        let mut directory = DirectoryConfig::new(
            require("AUTH0_DOMAIN")?,
            get("AUTH0_MANAGEMENT_CLIENT_ID").unwrap_or_default(),
            get("AUTH0_MANAGEMENT_CLIENT_SECRET").unwrap_or_default(),
        );
        if let Some(audience) = get("AUTH0_AUDIENCE") {
            directory.audience = audience;
        }
        if let Some(secs) = get("DIRECTORY_TIMEOUT_SECONDS") {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("Invalid DIRECTORY_TIMEOUT_SECONDS `{}`", secs))?;
            directory.timeout = Duration::from_secs(secs);
        }

        let cors_allowed_origins = get("CORS_ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            production,
            port,
            auth,
            directory,
            cors_allowed_origins,
        })
    }
}

/// Decode the base64url signing secret.
pub fn decode_signing_secret(encoded: &str) -> Result<Vec<u8>> {
    SECRET_ENGINE
        .decode(encoded.trim())
        .context("AUTH0_CLIENT_SECRET is not valid base64url")
}

/// Load env files without overriding variables that are already set.
///
/// Missing files are an error, matching a misconfigured deployment.
pub fn load_env_files<P: AsRef<Path>>(paths: &[P]) -> Result<()> {
    for path in paths {
        let path = path.as_ref();
        dotenvy::from_path(path)
            .with_context(|| format!("Failed to load env file {}", path.display()))?;
        debug!("Loaded env file {}", path.display());
    }
    Ok(())
}

/// Env files for the current `APP_ENV`: `prod.env` then `main.env` in production.
pub fn default_env_files() -> Vec<&'static str> {
    if env::var("APP_ENV").as_deref() == Ok("prod") {
        info!("Production environment detected");
        vec!["prod.env", "main.env"]
    } else {
        vec!["main.env"]
    }
}
