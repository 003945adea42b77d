use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::database::store::{
    Membership, MembershipStore, PrincipalStore, RoleAssignmentStore, StorageError, UserRecord,
};
use crate::types::{Role, TenantId, UserId};

/// PostgreSQL-backed principal, role and membership stores.
///
/// Expects the `usr`, `role`, `user_role`, `tenant_role` and `tenant_member`
/// tables, with `tenant_member.created_at` as `timestamptz`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    user_id: i64,
    email: String,
    password_hash: String,
}

impl From<UserRow> for UserRecord {
    fn from(row: UserRow) -> Self {
        Self {
            user_id: UserId::new(row.user_id),
            email: row.email,
            password_hash: row.password_hash,
        }
    }
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn role_id(&self, role: Role) -> Result<i64, StorageError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM role WHERE name = $1")
            .bind(role.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(id,)| id)
            .ok_or_else(|| StorageError::NotFound(format!("role {}", role)))
    }

    async fn ensure_member(
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        tenant_id: TenantId,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO tenant_member (user_id, tenant_id) VALUES ($1, $2) \
             ON CONFLICT (user_id, tenant_id) DO NOTHING",
        )
        .bind(user_id.get())
        .bind(tenant_id.get())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PrincipalStore for PgStore {
    async fn get_by_email(&self, email: &str) -> Result<Option<UserRecord>, StorageError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT user_id, email, password_hash FROM usr WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserRecord::from))
    }
}

#[async_trait]
impl RoleAssignmentStore for PgStore {
    async fn list_system_roles(&self, user_id: UserId) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT r.name FROM user_role ur JOIN role r ON ur.role_id = r.id WHERE ur.user_id = $1",
        )
        .bind(user_id.get())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn list_tenant_roles(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
    ) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT r.name FROM tenant_role tr JOIN role r ON tr.role_id = r.id \
             WHERE tr.user_id = $1 AND tr.tenant_id = $2",
        )
        .bind(user_id.get())
        .bind(tenant_id.get())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn assign_system_role(&self, user_id: UserId, role: Role) -> Result<(), StorageError> {
        let role_id = self.role_id(role).await?;
        sqlx::query(
            "INSERT INTO user_role (user_id, role_id) VALUES ($1, $2) \
             ON CONFLICT (user_id, role_id) DO NOTHING",
        )
        .bind(user_id.get())
        .bind(role_id)
        .execute(&self.pool)
        .await?;

        tracing::info!("Assigned role {} to user {}", role, user_id);
        Ok(())
    }

    async fn revoke_system_role(&self, user_id: UserId, role: Role) -> Result<(), StorageError> {
        let role_id = self.role_id(role).await?;
        let result = sqlx::query("DELETE FROM user_role WHERE user_id = $1 AND role_id = $2")
            .bind(user_id.get())
            .bind(role_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("role {} for user {}", role, user_id)));
        }
        tracing::info!("Revoked role {} from user {}", role, user_id);
        Ok(())
    }

    async fn assign_tenant_role(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        role: Role,
    ) -> Result<(), StorageError> {
        let role_id = self.role_id(role).await?;

        let mut tx = self.pool.begin().await?;
        Self::ensure_member(&mut tx, user_id, tenant_id).await?;
        sqlx::query(
            "INSERT INTO tenant_role (user_id, tenant_id, role_id) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, tenant_id, role_id) DO NOTHING",
        )
        .bind(user_id.get())
        .bind(tenant_id.get())
        .bind(role_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!("Assigned role {} to user {} in tenant {}", role, user_id, tenant_id);
        Ok(())
    }

    async fn revoke_tenant_role(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        role: Role,
    ) -> Result<(), StorageError> {
        let role_id = self.role_id(role).await?;
        let result = sqlx::query(
            "DELETE FROM tenant_role WHERE user_id = $1 AND tenant_id = $2 AND role_id = $3",
        )
        .bind(user_id.get())
        .bind(tenant_id.get())
        .bind(role_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "role {} for user {} in tenant {}",
                role, user_id, tenant_id
            )));
        }
        tracing::info!("Revoked role {} from user {} in tenant {}", role, user_id, tenant_id);
        Ok(())
    }
}

#[async_trait]
impl MembershipStore for PgStore {
    async fn is_member(&self, user_id: UserId, tenant_id: TenantId) -> Result<bool, StorageError> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM tenant_member WHERE user_id = $1 AND tenant_id = $2)",
        )
        .bind(user_id.get())
        .bind(tenant_id.get())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn default_tenant(&self, user_id: UserId) -> Result<Option<TenantId>, StorageError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT tenant_id FROM tenant_member WHERE user_id = $1 ORDER BY created_at ASC LIMIT 1",
        )
        .bind(user_id.get())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id,)| TenantId::new(id)))
    }

    async fn list_memberships(&self, user_id: UserId) -> Result<Vec<Membership>, StorageError> {
        let rows: Vec<(i64, i64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT user_id, tenant_id, created_at FROM tenant_member \
             WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id.get())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, tenant_id, created_at)| Membership {
                user_id: UserId::new(user_id),
                tenant_id: TenantId::new(tenant_id),
                created_at,
            })
            .collect())
    }

    async fn add_member(&self, user_id: UserId, tenant_id: TenantId) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        Self::ensure_member(&mut tx, user_id, tenant_id).await?;
        tx.commit().await?;

        tracing::info!("User {} added to tenant {}", user_id, tenant_id);
        Ok(())
    }

    async fn remove_member(&self, user_id: UserId, tenant_id: TenantId) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM tenant_role WHERE user_id = $1 AND tenant_id = $2")
            .bind(user_id.get())
            .bind(tenant_id.get())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM tenant_member WHERE user_id = $1 AND tenant_id = $2")
            .bind(user_id.get())
            .bind(tenant_id.get())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            // dropping the transaction rolls back the role deletion
            return Err(StorageError::MemberNotFound { user_id, tenant_id });
        }

        tx.commit().await?;
        tracing::info!("User {} removed from tenant {}", user_id, tenant_id);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
