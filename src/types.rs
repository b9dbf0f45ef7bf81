//! NewType wrappers for the identifiers that flow through the auth pipeline.
//!
//! Tenants, roles and user ids are all plain strings on the wire; wrapping
//! them keeps a role name from being passed where a tenant is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the wrapped string is empty.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Stable, tenant-agnostic user identifier.
    ///
    /// This is the directory's `user_id` with the identity-provider prefix
    /// (e.g. `auth0|`) removed.
    UserId
);

newtype_string!(
    /// Tenant under which a user's role and groups are evaluated.
    ///
    /// The active tenant is fixed per deployment and selects one entry of an
    /// identity's permission map.
    TenantId
);

newtype_string!(
    /// Role name as configured for the deployment (e.g. "admin").
    ///
    /// Roles are compared by exact string equality only.
    RoleName
);

/// Identity-provider prefix carried by directory user ids and `sub` claims.
pub const PROVIDER_PREFIX: &str = "auth0|";

impl UserId {
    /// Build a user id from a provider subject, stripping the provider prefix.
    pub fn from_subject(subject: &str) -> Self {
        Self(subject.replace(PROVIDER_PREFIX, ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_from_subject_strips_prefix() {
        assert_eq!(UserId::from_subject("auth0|u1").as_str(), "u1");
        assert_eq!(UserId::from_subject("u2").as_str(), "u2");
    }

    #[test]
    fn test_newtype_display_and_borrow() {
        let tenant = TenantId::new("t1");
        assert_eq!(tenant.to_string(), "t1");

        let mut map = std::collections::BTreeMap::new();
        map.insert(tenant.clone(), 1);
        assert_eq!(map.get("t1"), Some(&1));
    }

    #[test]
    fn test_role_name_serializes_transparently() {
        let role = RoleName::new("admin");
        assert_eq!(serde_json::to_string(&role).unwrap(), "\"admin\"");
        assert!(RoleName::default().is_empty());
    }
}
