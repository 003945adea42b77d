//! In-process stores and transaction provider.
//!
//! Used by the test suites and for running the server without a database.
//! The transaction provider records every lifecycle call so tests can assert
//! on commit/rollback behaviour.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::database::store::{
    Membership, MembershipStore, PrincipalStore, RoleAssignmentStore, StorageError, UserRecord,
};
use crate::database::transaction::{TxProvider, TxSession};
use crate::types::{Role, TenantId, UserId};

#[derive(Default)]
struct MemoryData {
    users: HashMap<String, UserRecord>,
    system_roles: HashMap<UserId, BTreeSet<String>>,
    tenant_roles: HashMap<(UserId, TenantId), BTreeSet<String>>,
    memberships: Vec<Membership>,
}

/// Principal, role and membership stores backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<MemoryData>,
    fail_roles: AtomicBool,
    fail_membership: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user_id: UserId, email: &str, password_hash: &str) {
        let record = UserRecord {
            user_id,
            email: email.to_string(),
            password_hash: password_hash.to_string(),
        };
        self.write().users.insert(email.to_string(), record);
    }

    pub fn grant_system_role(&self, user_id: UserId, role: Role) {
        self.grant_system_role_name(user_id, role.as_str());
    }

    /// Store a raw role name, including names outside the known role set.
    pub fn grant_system_role_name(&self, user_id: UserId, name: &str) {
        self.write()
            .system_roles
            .entry(user_id)
            .or_default()
            .insert(name.to_string());
    }

    /// Grant a tenant role, adding the membership if missing.
    pub fn grant_tenant_role(&self, user_id: UserId, tenant_id: TenantId, role: Role) {
        let mut data = self.write();
        Self::ensure_member(&mut data, user_id, tenant_id, Utc::now());
        data.tenant_roles
            .entry((user_id, tenant_id))
            .or_default()
            .insert(role.as_str().to_string());
    }

    pub fn add_member_at(&self, user_id: UserId, tenant_id: TenantId, created_at: DateTime<Utc>) {
        Self::ensure_member(&mut self.write(), user_id, tenant_id, created_at);
    }

    /// Make every role lookup fail with `StorageError::Unavailable`.
    pub fn fail_role_lookups(&self, fail: bool) {
        self.fail_roles.store(fail, Ordering::SeqCst);
    }

    /// Make every membership lookup fail with `StorageError::Unavailable`.
    pub fn fail_membership_lookups(&self, fail: bool) {
        self.fail_membership.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<(), StorageError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!("{} lookup failed", what)));
        }
        Ok(())
    }

    fn ensure_member(data: &mut MemoryData, user_id: UserId, tenant_id: TenantId, created_at: DateTime<Utc>) {
        let exists = data
            .memberships
            .iter()
            .any(|m| m.user_id == user_id && m.tenant_id == tenant_id);
        if !exists {
            data.memberships.push(Membership {
                user_id,
                tenant_id,
                created_at,
            });
        }
    }
}

#[async_trait]
impl PrincipalStore for MemoryStore {
    async fn get_by_email(&self, email: &str) -> Result<Option<UserRecord>, StorageError> {
        Ok(self.read().users.get(email).cloned())
    }
}

#[async_trait]
impl RoleAssignmentStore for MemoryStore {
    async fn list_system_roles(&self, user_id: UserId) -> Result<Vec<String>, StorageError> {
        Self::check(&self.fail_roles, "role")?;
        Ok(self
            .read()
            .system_roles
            .get(&user_id)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_tenant_roles(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
    ) -> Result<Vec<String>, StorageError> {
        Self::check(&self.fail_roles, "role")?;
        Ok(self
            .read()
            .tenant_roles
            .get(&(user_id, tenant_id))
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn assign_system_role(&self, user_id: UserId, role: Role) -> Result<(), StorageError> {
        self.grant_system_role(user_id, role);
        Ok(())
    }

    async fn revoke_system_role(&self, user_id: UserId, role: Role) -> Result<(), StorageError> {
        let removed = self
            .write()
            .system_roles
            .get_mut(&user_id)
            .is_some_and(|names| names.remove(role.as_str()));
        if !removed {
            return Err(StorageError::NotFound(format!("role {} for user {}", role, user_id)));
        }
        Ok(())
    }

    async fn assign_tenant_role(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        role: Role,
    ) -> Result<(), StorageError> {
        self.grant_tenant_role(user_id, tenant_id, role);
        Ok(())
    }

    async fn revoke_tenant_role(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        role: Role,
    ) -> Result<(), StorageError> {
        let removed = self
            .write()
            .tenant_roles
            .get_mut(&(user_id, tenant_id))
            .is_some_and(|names| names.remove(role.as_str()));
        if !removed {
            return Err(StorageError::NotFound(format!(
                "role {} for user {} in tenant {}",
                role, user_id, tenant_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    async fn is_member(&self, user_id: UserId, tenant_id: TenantId) -> Result<bool, StorageError> {
        Self::check(&self.fail_membership, "membership")?;
        Ok(self
            .read()
            .memberships
            .iter()
            .any(|m| m.user_id == user_id && m.tenant_id == tenant_id))
    }

    async fn default_tenant(&self, user_id: UserId) -> Result<Option<TenantId>, StorageError> {
        Ok(self
            .list_memberships(user_id)
            .await?
            .first()
            .map(|m| m.tenant_id))
    }

    async fn list_memberships(&self, user_id: UserId) -> Result<Vec<Membership>, StorageError> {
        Self::check(&self.fail_membership, "membership")?;
        let mut memberships: Vec<Membership> = self
            .read()
            .memberships
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        memberships.sort_by_key(|m| m.created_at);
        Ok(memberships)
    }

    async fn add_member(&self, user_id: UserId, tenant_id: TenantId) -> Result<(), StorageError> {
        self.add_member_at(user_id, tenant_id, Utc::now());
        Ok(())
    }

    async fn remove_member(&self, user_id: UserId, tenant_id: TenantId) -> Result<(), StorageError> {
        let mut data = self.write();
        let before = data.memberships.len();
        data.memberships
            .retain(|m| !(m.user_id == user_id && m.tenant_id == tenant_id));
        if data.memberships.len() == before {
            return Err(StorageError::MemberNotFound { user_id, tenant_id });
        }
        data.tenant_roles.remove(&(user_id, tenant_id));
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Self::check(&self.fail_membership, "membership")
    }
}

/// One recorded transaction lifecycle call. The number is the transaction id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEvent {
    Begin(u64),
    SetScope(u64, TenantId),
    ClearScope(u64),
    Commit(u64),
    Rollback(u64),
}

/// Fault injection points for `MemoryTxProvider`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TxFaults {
    pub begin: bool,
    pub set_scope: bool,
    pub clear_scope: bool,
    pub commit: bool,
}

#[derive(Default)]
struct TxLog {
    next_id: u64,
    open: usize,
    events: Vec<TxEvent>,
    faults: TxFaults,
}

/// Transaction provider that records lifecycle calls instead of talking to a database.
#[derive(Clone, Default)]
pub struct MemoryTxProvider {
    log: Arc<Mutex<TxLog>>,
}

impl MemoryTxProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_faults(&self, faults: TxFaults) {
        self.lock().faults = faults;
    }

    pub fn events(&self) -> Vec<TxEvent> {
        self.lock().events.clone()
    }

    /// Transactions begun but neither committed nor rolled back.
    pub fn open_transactions(&self) -> usize {
        self.lock().open
    }

    pub fn commits(&self) -> usize {
        self.count(|e| matches!(e, TxEvent::Commit(_)))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|e| matches!(e, TxEvent::Rollback(_)))
    }

    fn count(&self, pred: impl Fn(&TxEvent) -> bool) -> usize {
        self.lock().events.iter().filter(|e| pred(e)).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TxLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TxProvider for MemoryTxProvider {
    async fn begin(&self) -> Result<Box<dyn TxSession>, StorageError> {
        let mut log = self.lock();
        if log.faults.begin {
            return Err(StorageError::Transaction("begin failed".to_string()));
        }
        log.next_id += 1;
        log.open += 1;
        let id = log.next_id;
        log.events.push(TxEvent::Begin(id));

        Ok(Box::new(MemoryTxSession {
            id,
            log: self.log.clone(),
            filter: String::new(),
            finished: false,
        }))
    }
}

struct MemoryTxSession {
    id: u64,
    log: Arc<Mutex<TxLog>>,
    /// Emulated session filter variable; empty means unset.
    filter: String,
    finished: bool,
}

impl MemoryTxSession {
    fn lock(&self) -> std::sync::MutexGuard<'_, TxLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&mut self, event: TxEvent) {
        if self.finished {
            return;
        }
        self.finished = true;
        let mut log = self.lock();
        log.open = log.open.saturating_sub(1);
        log.events.push(event);
    }
}

#[async_trait]
impl TxSession for MemoryTxSession {
    async fn set_scope(&mut self, tenant_id: TenantId) -> Result<(), StorageError> {
        {
            let mut log = self.lock();
            if log.faults.set_scope {
                return Err(StorageError::Transaction("set_config failed".to_string()));
            }
            log.events.push(TxEvent::SetScope(self.id, tenant_id));
        }
        self.filter = tenant_id.to_string();
        Ok(())
    }

    async fn clear_scope(&mut self) -> Result<(), StorageError> {
        {
            let mut log = self.lock();
            if log.faults.clear_scope {
                return Err(StorageError::Transaction("set_config failed".to_string()));
            }
            log.events.push(TxEvent::ClearScope(self.id));
        }
        self.filter.clear();
        Ok(())
    }

    async fn current_scope(&mut self) -> Result<Option<TenantId>, StorageError> {
        if self.filter.is_empty() {
            return Ok(None);
        }
        self.filter
            .parse()
            .map(Some)
            .map_err(|_| StorageError::Transaction(format!("invalid tenant filter '{}'", self.filter)))
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        let id = self.id;
        let fail = self.lock().faults.commit;
        if fail {
            self.finish(TxEvent::Rollback(id));
            return Err(StorageError::Transaction("commit failed".to_string()));
        }
        self.finish(TxEvent::Commit(id));
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        let id = self.id;
        self.finish(TxEvent::Rollback(id));
        Ok(())
    }
}

impl Drop for MemoryTxSession {
    fn drop(&mut self) {
        // an unfinished session is rolled back, like a dropped database transaction
        let id = self.id;
        self.finish(TxEvent::Rollback(id));
    }
}
