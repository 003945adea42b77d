use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::types::{Role, TenantId, UserId};

/// Errors raised by the principal, role and membership stores and by
/// transaction sessions.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("user {user_id} is not a member of tenant {tenant_id}")]
    MemberNotFound { user_id: UserId, tenant_id: TenantId },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Stored user row needed for login.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user_id: UserId,
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Membership {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn get_by_email(&self, email: &str) -> Result<Option<UserRecord>, StorageError>;
}

/// Platform-wide and tenant-scoped role grants.
///
/// Listing returns the stored role names as-is; unknown names are filtered
/// by the caller.
#[async_trait]
pub trait RoleAssignmentStore: Send + Sync {
    async fn list_system_roles(&self, user_id: UserId) -> Result<Vec<String>, StorageError>;

    async fn list_tenant_roles(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
    ) -> Result<Vec<String>, StorageError>;

    async fn assign_system_role(&self, user_id: UserId, role: Role) -> Result<(), StorageError>;

    async fn revoke_system_role(&self, user_id: UserId, role: Role) -> Result<(), StorageError>;

    /// Grants a tenant role, adding the membership first if it is missing.
    async fn assign_tenant_role(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        role: Role,
    ) -> Result<(), StorageError>;

    async fn revoke_tenant_role(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        role: Role,
    ) -> Result<(), StorageError>;
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn is_member(&self, user_id: UserId, tenant_id: TenantId) -> Result<bool, StorageError>;

    /// Earliest-created membership, if any.
    async fn default_tenant(&self, user_id: UserId) -> Result<Option<TenantId>, StorageError>;

    /// All memberships of a user, oldest first.
    async fn list_memberships(&self, user_id: UserId) -> Result<Vec<Membership>, StorageError>;

    /// Idempotent.
    async fn add_member(&self, user_id: UserId, tenant_id: TenantId) -> Result<(), StorageError>;

    /// Removes the membership and the user's tenant role grants for that
    /// tenant in one atomic unit. Fails with `MemberNotFound` when absent.
    async fn remove_member(&self, user_id: UserId, tenant_id: TenantId) -> Result<(), StorageError>;

    /// Liveness check used by `/health`.
    async fn ping(&self) -> Result<(), StorageError>;
}
