//! Tenant-scoped authentication and role authorization.
//!
//! A request moves through the pipeline in a fixed order:
//!
//! 1. [`extract_bearer`] pulls the token out of the `Authorization` header
//! 2. [`TokenCodec`] checks structure, signing method, signature and expiry
//! 3. [`IdentityResolver`] turns the token into an [`Identity`], either from
//!    the claims or through the [`UserDirectory`](crate::directory::UserDirectory)
//! 4. [`PermissionResolver`] settles the role for the active tenant
//! 5. the result is attached as a [`RequestContext`] and the role guards read it
//!
//! ## Usage
//!
//! ```ignore
//! let gate = Arc::new(AuthGate::new(codec, IdentityResolver::from_claims(), permissions));
//!
//! let route = get(handler)
//!     .route_layer(from_fn_with_state(gate.clone(), guard::admin))
//!     .route_layer(from_fn_with_state(gate, guard::authenticated));
//! ```

mod context;
mod error;
pub mod guard;
mod identity;
mod permissions;
mod resolver;
mod token;

pub use context::RequestContext;
pub use error::{AuthError, AuthResult};
pub use guard::{AuthGate, RoleGuard};
pub use identity::{Identity, PermissionRecord, PermissionsMap, Profile, UserMetadata};
pub use permissions::PermissionResolver;
pub use resolver::IdentityResolver;
pub use token::{BEARER_SCHEME, KeyResolver, Token, TokenCodec, extract_bearer};

#[cfg(test)]
pub(crate) use token::tests as token_tests;
