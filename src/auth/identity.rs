//! Canonical user identity and its per-tenant permission records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{RoleName, TenantId, UserId};

/// The `{role, groups}` pair effective for one identity under one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    pub role: RoleName,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl PermissionRecord {
    /// A record with `role` and no groups.
    pub fn with_role(role: RoleName) -> Self {
        Self {
            role,
            groups: Vec::new(),
        }
    }
}

/// Permission records keyed by tenant.
pub type PermissionsMap = BTreeMap<TenantId, PermissionRecord>;

/// Free-form profile data kept by the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_object_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
}

/// A resolved user.
///
/// `id` is non-empty exactly when resolution succeeded. Once placed in a
/// [`RequestContext`](crate::auth::RequestContext) the identity is shared
/// read-only for the rest of the request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identity {
    pub id: UserId,
    pub nickname: String,
    pub picture: String,
    pub email: String,
    pub email_verified: bool,
    pub last_ip: Option<String>,
    pub last_login: Option<DateTime<Utc>>,
    pub logins_count: u64,
    pub blocked: bool,
    pub permissions: PermissionsMap,
    pub user_metadata: UserMetadata,
}

impl Identity {
    /// Whether this identity came out of a successful resolution.
    pub fn is_resolved(&self) -> bool {
        !self.id.is_empty()
    }

    /// Client-facing view with the permission record for `tenant` only.
    pub fn to_profile(&self, tenant: &TenantId) -> Profile {
        Profile {
            id: self.id.clone(),
            nickname: self.nickname.clone(),
            picture: self.picture.clone(),
            email: self.email.clone(),
            email_verified: self.email_verified,
            last_ip: self.last_ip.clone(),
            last_login: self.last_login,
            logins_count: self.logins_count,
            blocked: self.blocked,
            permissions: self.permissions.get(tenant).cloned(),
            user_metadata: self.user_metadata.clone(),
        }
    }
}

/// Serialized shape of an identity returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: UserId,
    pub nickname: String,
    pub picture: String,
    pub email: String,
    pub email_verified: bool,
    #[serde(rename = "lastIP")]
    pub last_ip: Option<String>,
    pub last_login: Option<DateTime<Utc>>,
    pub logins_count: u64,
    pub blocked: bool,
    pub permissions: Option<PermissionRecord>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        let mut permissions = PermissionsMap::new();
        permissions.insert(
            TenantId::new("t1"),
            PermissionRecord {
                role: RoleName::new("admin"),
                groups: vec!["ops".to_string()],
            },
        );
        permissions.insert(TenantId::new("t2"), PermissionRecord::with_role(RoleName::new("guest")));

        Identity {
            id: UserId::new("u1"),
            nickname: "alice".to_string(),
            email: "a@x.com".to_string(),
            email_verified: true,
            permissions,
            user_metadata: UserMetadata {
                company_name: Some("Acme".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_default_identity_is_unresolved() {
        assert!(!Identity::default().is_resolved());
        assert!(identity().is_resolved());
    }

    #[test]
    fn test_profile_carries_active_tenant_only() {
        let profile = identity().to_profile(&TenantId::new("t1"));
        let json = serde_json::to_value(&profile).unwrap();

        assert_eq!(json["id"], "u1");
        assert_eq!(json["emailVerified"], true);
        assert_eq!(json["lastIP"], serde_json::Value::Null);
        assert_eq!(json["permissions"]["role"], "admin");
        assert_eq!(json["permissions"]["groups"][0], "ops");
        assert_eq!(json["userMetadata"]["companyName"], "Acme");
    }

    #[test]
    fn test_profile_for_unknown_tenant_has_no_permissions() {
        let profile = identity().to_profile(&TenantId::new("t3"));
        assert!(profile.permissions.is_none());
    }

    #[test]
    fn test_permission_record_groups_default_to_empty() {
        let record: PermissionRecord = serde_json::from_str(r#"{"role":"guest"}"#).unwrap();
        assert_eq!(record, PermissionRecord::with_role(RoleName::new("guest")));
    }

    #[test]
    fn test_user_metadata_camel_case() {
        let meta: UserMetadata =
            serde_json::from_str(r#"{"companyObjectId":"c1","companyName":"Acme"}"#).unwrap();
        assert_eq!(meta.company_object_id.as_deref(), Some("c1"));
        assert_eq!(meta.company_name.as_deref(), Some("Acme"));
        assert_eq!(serde_json::to_string(&UserMetadata::default()).unwrap(), "{}");
    }
}
