use std::sync::Arc;

use crate::database::store::{Membership, MembershipStore, StorageError};
use crate::types::{TenantId, UserId};

/// Answers tenant membership questions.
#[derive(Clone)]
pub struct MembershipOracle {
    store: Arc<dyn MembershipStore>,
}

impl MembershipOracle {
    pub fn new(store: Arc<dyn MembershipStore>) -> Self {
        Self { store }
    }

    pub async fn is_member(&self, user_id: UserId, tenant_id: TenantId) -> Result<bool, StorageError> {
        self.store.is_member(user_id, tenant_id).await
    }

    /// Membership check that treats a store failure as "not a member".
    pub async fn is_member_or_deny(&self, user_id: UserId, tenant_id: TenantId) -> bool {
        match self.store.is_member(user_id, tenant_id).await {
            Ok(member) => member,
            Err(e) => {
                tracing::warn!(
                    "Membership check failed for user {} in tenant {}, denying: {}",
                    user_id,
                    tenant_id,
                    e
                );
                false
            }
        }
    }

    pub async fn default_tenant(&self, user_id: UserId) -> Result<Option<TenantId>, StorageError> {
        let tenant = self.store.default_tenant(user_id).await?;
        if tenant.is_none() {
            tracing::info!("No tenant memberships found for user {}", user_id);
        }
        Ok(tenant)
    }

    pub async fn memberships(&self, user_id: UserId) -> Result<Vec<Membership>, StorageError> {
        self.store.list_memberships(user_id).await
    }

    pub async fn add_member(&self, user_id: UserId, tenant_id: TenantId) -> Result<(), StorageError> {
        self.store.add_member(user_id, tenant_id).await
    }

    /// Removes the membership together with the user's grants in that tenant.
    pub async fn remove_member(&self, user_id: UserId, tenant_id: TenantId) -> Result<(), StorageError> {
        self.store.remove_member(user_id, tenant_id).await
    }

    pub async fn ping(&self) -> Result<(), StorageError> {
        self.store.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use crate::database::store::RoleAssignmentStore;
    use crate::types::Role;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn default_tenant_is_earliest_membership() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.add_member_at(UserId::new(1), TenantId::new(20), now);
        store.add_member_at(UserId::new(1), TenantId::new(10), now - Duration::hours(1));
        let oracle = MembershipOracle::new(Arc::new(store));

        assert_eq!(oracle.default_tenant(UserId::new(1)).await.unwrap(), Some(TenantId::new(10)));
        assert_eq!(oracle.default_tenant(UserId::new(2)).await.unwrap(), None);

        let tenants: Vec<_> = oracle
            .memberships(UserId::new(1))
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.tenant_id)
            .collect();
        assert_eq!(tenants, vec![TenantId::new(10), TenantId::new(20)]);
    }

    #[tokio::test]
    async fn remove_member_cascades_tenant_roles() {
        let store = Arc::new(MemoryStore::new());
        store
            .assign_tenant_role(UserId::new(1), TenantId::new(3), Role::TenantSuper)
            .await
            .unwrap();
        let oracle = MembershipOracle::new(store.clone());
        assert!(oracle.is_member(UserId::new(1), TenantId::new(3)).await.unwrap());

        oracle.remove_member(UserId::new(1), TenantId::new(3)).await.unwrap();

        assert!(!oracle.is_member(UserId::new(1), TenantId::new(3)).await.unwrap());
        assert!(store
            .list_tenant_roles(UserId::new(1), TenantId::new(3))
            .await
            .unwrap()
            .is_empty());

        let err = oracle.remove_member(UserId::new(1), TenantId::new(3)).await.unwrap_err();
        assert!(matches!(err, StorageError::MemberNotFound { .. }));
    }

    #[tokio::test]
    async fn lookup_failure_is_treated_as_non_member() {
        let store = MemoryStore::new();
        store.add_member_at(UserId::new(1), TenantId::new(3), Utc::now());
        store.fail_membership_lookups(true);
        let oracle = MembershipOracle::new(Arc::new(store));

        assert!(oracle.is_member(UserId::new(1), TenantId::new(3)).await.is_err());
        assert!(!oracle.is_member_or_deny(UserId::new(1), TenantId::new(3)).await);
    }
}
