use std::sync::Arc;

use crate::database::store::{RoleAssignmentStore, StorageError};
use crate::types::{Role, RoleSet, TenantId, UserId};

/// Computes role sets from the role assignment store.
#[derive(Clone)]
pub struct RoleResolver {
    store: Arc<dyn RoleAssignmentStore>,
}

impl RoleResolver {
    pub fn new(store: Arc<dyn RoleAssignmentStore>) -> Self {
        Self { store }
    }

    pub async fn system_roles(&self, user_id: UserId) -> Result<RoleSet, StorageError> {
        let names = self.store.list_system_roles(user_id).await?;
        if names.is_empty() {
            tracing::debug!("No system roles found for user {}", user_id);
        }
        Ok(parse_roles(names))
    }

    pub async fn tenant_roles(&self, user_id: UserId, tenant_id: TenantId) -> Result<RoleSet, StorageError> {
        let names = self.store.list_tenant_roles(user_id, tenant_id).await?;
        Ok(parse_roles(names))
    }

    /// System roles, degrading to an empty set when the store fails.
    ///
    /// Fail-open: a roleless user can still reach role-agnostic routes.
    pub async fn system_roles_or_empty(&self, user_id: UserId) -> RoleSet {
        match self.system_roles(user_id).await {
            Ok(roles) => roles,
            Err(e) => {
                tracing::warn!(
                    "System role lookup failed for user {}, continuing without roles: {}",
                    user_id,
                    e
                );
                RoleSet::new()
            }
        }
    }

    pub async fn tenant_roles_or_empty(&self, user_id: UserId, tenant_id: TenantId) -> RoleSet {
        match self.tenant_roles(user_id, tenant_id).await {
            Ok(roles) => roles,
            Err(e) => {
                tracing::warn!(
                    "Tenant role lookup failed for user {} in tenant {}, continuing without tenant roles: {}",
                    user_id,
                    tenant_id,
                    e
                );
                RoleSet::new()
            }
        }
    }

    pub async fn assign_system_role(&self, user_id: UserId, role: Role) -> Result<(), StorageError> {
        self.store.assign_system_role(user_id, role).await
    }

    /// Fails with `NotFound` when the user does not hold `role`.
    pub async fn revoke_system_role(&self, user_id: UserId, role: Role) -> Result<(), StorageError> {
        self.store.revoke_system_role(user_id, role).await
    }

    /// Also adds the tenant membership when it is missing.
    pub async fn assign_tenant_role(&self, user_id: UserId, tenant_id: TenantId, role: Role) -> Result<(), StorageError> {
        self.store.assign_tenant_role(user_id, tenant_id, role).await
    }

    pub async fn revoke_tenant_role(&self, user_id: UserId, tenant_id: TenantId, role: Role) -> Result<(), StorageError> {
        self.store.revoke_tenant_role(user_id, tenant_id, role).await
    }
}

fn parse_roles(names: Vec<String>) -> RoleSet {
    names
        .into_iter()
        .filter_map(|name| match name.parse::<Role>() {
            Ok(role) => Some(role),
            Err(e) => {
                tracing::warn!("Skipping stored role: {}", e);
                None
            }
        })
        .collect()
}
