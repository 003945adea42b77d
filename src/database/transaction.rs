//! Request-bound transactions and tenant scope activation.
//!
//! Lifecycle of a bound transaction:
//!
//! ```text
//! Open -> ScopeSet | ScopeSkipped -> Committed | RolledBack
//! ```
//!
//! The session filter variable is cleared before the transaction is released
//! and a scope failure always ends in a rollback.

use async_trait::async_trait;
use axum::http::StatusCode;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use crate::database::store::StorageError;
use crate::types::TenantId;

/// Opens transactions.
#[async_trait]
pub trait TxProvider: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn TxSession>, StorageError>;
}

/// One open transaction. Dropping an unfinished session rolls it back.
#[async_trait]
pub trait TxSession: Send {
    /// Set the session filter variable to `tenant_id`.
    async fn set_scope(&mut self, tenant_id: TenantId) -> Result<(), StorageError>;

    /// Reset the session filter variable.
    async fn clear_scope(&mut self) -> Result<(), StorageError>;

    /// Read the session filter variable back.
    async fn current_scope(&mut self) -> Result<Option<TenantId>, StorageError>;

    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}

/// PostgreSQL transactions with the tenant filter held in a custom setting.
#[derive(Clone)]
pub struct PgTxProvider {
    pool: PgPool,
    setting: Arc<str>,
}

impl PgTxProvider {
    /// `setting` must be a `prefix.name` custom setting; it is bound as a
    /// parameter, never interpolated.
    pub fn new(pool: PgPool, setting: &str) -> Self {
        Self {
            pool,
            setting: Arc::from(setting),
        }
    }
}

#[async_trait]
impl TxProvider for PgTxProvider {
    async fn begin(&self) -> Result<Box<dyn TxSession>, StorageError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTxSession {
            tx,
            setting: self.setting.clone(),
        }))
    }
}

struct PgTxSession {
    tx: Transaction<'static, Postgres>,
    setting: Arc<str>,
}

#[async_trait]
impl TxSession for PgTxSession {
    async fn set_scope(&mut self, tenant_id: TenantId) -> Result<(), StorageError> {
        sqlx::query("SELECT set_config($1, $2, false)")
            .bind(&*self.setting)
            .bind(tenant_id.to_string())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn clear_scope(&mut self) -> Result<(), StorageError> {
        sqlx::query("SELECT set_config($1, '', false)")
            .bind(&*self.setting)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn current_scope(&mut self) -> Result<Option<TenantId>, StorageError> {
        let (value,): (Option<String>,) = sqlx::query_as("SELECT current_setting($1, true)")
            .bind(&*self.setting)
            .fetch_one(&mut *self.tx)
            .await?;

        match value.as_deref() {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| StorageError::Transaction(format!("invalid tenant filter '{}'", raw))),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    Open,
    ScopeSet,
    ScopeSkipped,
    Committed,
    RolledBack,
}

/// How a bound transaction was finalised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Committed,
    RolledBack,
}

struct TxState {
    session: Option<Box<dyn TxSession>>,
    phase: TxPhase,
    poisoned: bool,
}

/// Handle to the transaction bound to the current request.
///
/// Cloned into the request extensions so later middleware and handlers share
/// the same transaction.
#[derive(Clone)]
pub struct BoundTx {
    inner: Arc<Mutex<TxState>>,
}

impl BoundTx {
    pub async fn begin(provider: &dyn TxProvider) -> Result<Self, StorageError> {
        let session = provider.begin().await?;
        Ok(Self {
            inner: Arc::new(Mutex::new(TxState {
                session: Some(session),
                phase: TxPhase::Open,
                poisoned: false,
            })),
        })
    }

    pub async fn phase(&self) -> TxPhase {
        self.inner.lock().await.phase
    }

    /// Activate the tenant filter, or record that the request is global.
    ///
    /// Any failure poisons the transaction so that finalisation rolls back.
    pub async fn activate_scope(&self, scope: Option<TenantId>) -> Result<(), StorageError> {
        let mut state = self.inner.lock().await;
        if state.phase != TxPhase::Open {
            state.poisoned = true;
            return Err(StorageError::Transaction(format!(
                "cannot activate scope in phase {:?}",
                state.phase
            )));
        }

        let Some(tenant_id) = scope else {
            state.phase = TxPhase::ScopeSkipped;
            return Ok(());
        };

        let result = match state.session.as_mut() {
            Some(session) => session.set_scope(tenant_id).await,
            None => Err(StorageError::Transaction("transaction already closed".to_string())),
        };

        match result {
            Ok(()) => {
                state.phase = TxPhase::ScopeSet;
                tracing::debug!("Tenant scope {} activated for transaction", tenant_id);
                Ok(())
            }
            Err(e) => {
                state.poisoned = true;
                Err(e)
            }
        }
    }

    /// Session filter value as seen by the transaction itself.
    pub async fn current_scope(&self) -> Result<Option<TenantId>, StorageError> {
        let mut state = self.inner.lock().await;
        let session = state
            .session
            .as_mut()
            .ok_or_else(|| StorageError::Transaction("transaction already closed".to_string()))?;
        session.current_scope().await
    }

    /// Exclusive access to the open session for domain queries.
    pub async fn session(&self) -> Result<MappedMutexGuard<'_, Box<dyn TxSession>>, StorageError> {
        let state = self.inner.lock().await;
        MutexGuard::try_map(state, |s| s.session.as_mut())
            .map_err(|_| StorageError::Transaction("transaction already closed".to_string()))
    }

    /// Clear the scope if it was set, then commit for responses below 500
    /// and roll back otherwise.
    ///
    /// An error means the transaction was rolled back and the response must
    /// become a 500.
    pub async fn finalize(&self, status: StatusCode) -> Result<TxOutcome, StorageError> {
        let mut state = self.inner.lock().await;
        let Some(mut session) = state.session.take() else {
            return Err(StorageError::Transaction("transaction already closed".to_string()));
        };

        if state.phase == TxPhase::ScopeSet {
            if let Err(e) = session.clear_scope().await {
                tracing::error!("Failed to clear tenant scope, rolling back: {}", e);
                state.phase = TxPhase::RolledBack;
                if let Err(rollback_err) = session.rollback().await {
                    tracing::error!("Rollback after scope clear failure failed: {}", rollback_err);
                }
                return Err(e);
            }
        }

        if state.poisoned || status.is_server_error() {
            state.phase = TxPhase::RolledBack;
            session.rollback().await.map_err(|e| {
                tracing::error!("Failed to roll back transaction: {}", e);
                e
            })?;
            tracing::debug!("Transaction rolled back (status {})", status.as_u16());
            return Ok(TxOutcome::RolledBack);
        }

        match session.commit().await {
            Ok(()) => {
                state.phase = TxPhase::Committed;
                tracing::debug!("Transaction committed (status {})", status.as_u16());
                Ok(TxOutcome::Committed)
            }
            Err(e) => {
                state.phase = TxPhase::RolledBack;
                tracing::error!("Failed to commit transaction: {}", e);
                Err(e)
            }
        }
    }

    /// Roll back immediately, clearing the scope first when possible.
    pub async fn rollback(&self) -> Result<(), StorageError> {
        let mut state = self.inner.lock().await;
        let Some(mut session) = state.session.take() else {
            return Ok(());
        };
        if state.phase == TxPhase::ScopeSet {
            if let Err(e) = session.clear_scope().await {
                tracing::warn!("Failed to clear tenant scope before rollback: {}", e);
            }
        }
        state.phase = TxPhase::RolledBack;
        session.rollback().await
    }

    /// Synchronous last resort for cancelled requests: drops the session,
    /// which rolls it back.
    pub fn abandon(&self) {
        if let Ok(mut state) = self.inner.try_lock() {
            if let Some(session) = state.session.take() {
                tracing::warn!("Request ended before finalisation, rolling back transaction");
                state.phase = TxPhase::RolledBack;
                drop(session);
            }
        }
    }

    pub fn same_as(&self, other: &BoundTx) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
