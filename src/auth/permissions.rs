//! Tenant-scoped role resolution.

use crate::auth::identity::{Identity, PermissionRecord};
use crate::config::{AuthConfig, RoleConfig};
use crate::types::{RoleName, TenantId};

/// Resolves the effective role and groups of an identity for a tenant.
///
/// Roles are compared by exact string equality. There is no implied
/// hierarchy: the predicates below spell out which roles each level accepts.
#[derive(Debug, Clone)]
pub struct PermissionResolver {
    tenant: TenantId,
    roles: RoleConfig,
}

impl PermissionResolver {
    pub fn new(tenant: TenantId, roles: RoleConfig) -> Self {
        Self { tenant, roles }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.tenant.clone(), config.roles.clone())
    }

    /// The active tenant for this deployment.
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn roles(&self) -> &RoleConfig {
        &self.roles
    }

    /// The record for `tenant`, synthesizing and storing the default one if absent.
    ///
    /// After this call the identity always carries a record for `tenant`, so
    /// repeated calls return the same value.
    pub fn resolve(&self, identity: &mut Identity, tenant: &TenantId) -> PermissionRecord {
        identity
            .permissions
            .entry(tenant.clone())
            .or_insert_with(|| PermissionRecord::with_role(self.roles.default_unauthorized.clone()))
            .clone()
    }

    /// [`resolve`](Self::resolve) for the active tenant.
    pub fn resolve_active(&self, identity: &mut Identity) -> PermissionRecord {
        self.resolve(identity, &self.tenant)
    }

    /// The active-tenant record without writing it back.
    pub fn effective(&self, identity: &Identity) -> PermissionRecord {
        identity
            .permissions
            .get(&self.tenant)
            .cloned()
            .unwrap_or_else(|| PermissionRecord::with_role(self.roles.default_unauthorized.clone()))
    }

    /// Set the active tenant's role, keeping its groups.
    ///
    /// An empty `new_role` selects the configured default role. Only the
    /// in-memory map changes; persisting it is up to the caller.
    pub fn update_role(&self, identity: &mut Identity, new_role: &str) {
        let role = if new_role.is_empty() {
            self.roles.default_role.clone()
        } else {
            RoleName::new(new_role)
        };

        identity
            .permissions
            .entry(self.tenant.clone())
            .or_default()
            .role = role;
    }

    /// The effective role for the active tenant.
    pub fn role(&self, identity: &Identity) -> RoleName {
        self.effective(identity).role
    }

    pub fn is_role(&self, identity: &Identity, role: &RoleName) -> bool {
        &self.role(identity) == role
    }

    /// Whether the identity has been granted anything for the active tenant.
    pub fn is_authenticated(&self, identity: &Identity) -> bool {
        !self.is_role(identity, &self.roles.default_unauthorized)
    }

    /// Consultant, supervisor or admin.
    pub fn is_consultant(&self, identity: &Identity) -> bool {
        let role = self.role(identity);
        role == self.roles.consultant || role == self.roles.supervisor || role == self.roles.admin
    }

    /// Supervisor or admin.
    pub fn is_supervisor(&self, identity: &Identity) -> bool {
        let role = self.role(identity);
        role == self.roles.supervisor || role == self.roles.admin
    }

    pub fn is_admin(&self, identity: &Identity) -> bool {
        self.is_role(identity, &self.roles.admin)
    }
}
