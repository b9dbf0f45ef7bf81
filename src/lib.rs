// Core modules
pub mod api;
pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod server;
mod types;

// Re-export key types and functions
pub use auth::{AuthError, AuthGate, Identity, PermissionRecord, RequestContext, RoleGuard, Token, TokenCodec};
pub use config::{AuthConfig, DirectoryConfig, GatewayConfig, IdentitySource, RoleConfig};
pub use directory::{Auth0Directory, DirectoryError, UserDirectory};
pub use error::ApiError;
pub use server::{create_app, serve};
pub use types::{RoleName, TenantId, UserId};
