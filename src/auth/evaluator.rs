//! Login, scope switching and access validation.

use std::sync::Arc;
use thiserror::Error;

use crate::auth::context::{ContextError, ScopeContext};
use crate::auth::membership::MembershipOracle;
use crate::auth::password::{dummy_hash, PasswordError, PasswordVerifier};
use crate::auth::roles::RoleResolver;
use crate::auth::token::{TokenCodec, TokenError, TokenPair};
use crate::database::store::{PrincipalStore, StorageError};
use crate::types::{Role, TenantId, UserId};

#[derive(Debug, Error)]
pub enum AccessError {
    /// Same error for unknown email and wrong password.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Context(#[from] ContextError),
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub tokens: TokenPair,
    pub user_id: UserId,
    pub tenant_id: Option<TenantId>,
}

pub struct AccessEvaluator {
    principals: Arc<dyn PrincipalStore>,
    passwords: Arc<dyn PasswordVerifier>,
    roles: RoleResolver,
    membership: MembershipOracle,
    codec: Arc<TokenCodec>,
}

impl AccessEvaluator {
    pub fn new(
        principals: Arc<dyn PrincipalStore>,
        passwords: Arc<dyn PasswordVerifier>,
        roles: RoleResolver,
        membership: MembershipOracle,
        codec: Arc<TokenCodec>,
    ) -> Self {
        Self {
            principals,
            passwords,
            roles,
            membership,
            codec,
        }
    }

    pub fn roles(&self) -> &RoleResolver {
        &self.roles
    }

    pub fn membership(&self) -> &MembershipOracle {
        &self.membership
    }

    /// Authenticate by email and password and issue a pair scoped to the
    /// user's default tenant.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AccessError> {
        let Some(user) = self.principals.get_by_email(email).await? else {
            // Burn the same verification cost as a real account
            let _ = self.verify_password(dummy_hash().to_string(), password).await;
            tracing::warn!("Login attempt for unknown email");
            return Err(AccessError::InvalidCredentials);
        };

        match self.verify_password(user.password_hash.clone(), password).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!("Invalid password attempt for user {}", user.user_id);
                return Err(AccessError::InvalidCredentials);
            }
            Err(PasswordError::InvalidHash(reason)) => {
                tracing::error!(
                    "Stored password hash for user {} is unusable: {}",
                    user.user_id,
                    reason
                );
                return Err(AccessError::InvalidCredentials);
            }
            Err(e) => return Err(e.into()),
        }

        let tenant_id = self.membership.default_tenant(user.user_id).await?;
        let tokens = self.codec.issue_pair(user.user_id, &user.email, tenant_id)?;

        tracing::info!("User {} successfully authenticated", user.user_id);
        Ok(LoginOutcome {
            tokens,
            user_id: user.user_id,
            tenant_id,
        })
    }

    /// Runs the verifier on the blocking pool; hashing is CPU bound.
    async fn verify_password(&self, stored_hash: String, password: &str) -> Result<bool, PasswordError> {
        let passwords = self.passwords.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || passwords.verify(&stored_hash, &password))
            .await
            .map_err(|e| PasswordError::Verification(e.to_string()))?
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// Without an explicit tenant the new pair is scoped like a fresh login.
    /// An explicit tenant requires membership.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        tenant: Option<TenantId>,
    ) -> Result<TokenPair, AccessError> {
        let claims = self.codec.validate(refresh_token)?;

        let target = match tenant {
            Some(tenant_id) => {
                if !self.membership.is_member_or_deny(claims.user_id, tenant_id).await {
                    tracing::warn!(
                        "User {} denied refresh into tenant {}",
                        claims.user_id,
                        tenant_id
                    );
                    return Err(AccessError::Unauthorized);
                }
                Some(tenant_id)
            }
            None => self.membership.default_tenant(claims.user_id).await?,
        };

        Ok(self.codec.refresh(refresh_token, target)?)
    }

    /// Re-issue `current_token` with a new scope.
    ///
    /// Going global requires `PlatformAdmin`. Entering a tenant requires
    /// membership in it, for admins too.
    pub async fn switch_scope(
        &self,
        user_id: UserId,
        current_token: &str,
        target: Option<TenantId>,
    ) -> Result<String, AccessError> {
        match target {
            None => {
                let roles = self.roles.system_roles_or_empty(user_id).await;
                if !roles.is_platform_admin() {
                    tracing::warn!("User {} denied switch to global scope", user_id);
                    return Err(AccessError::Unauthorized);
                }
            }
            Some(tenant_id) => {
                if !self.membership.is_member_or_deny(user_id, tenant_id).await {
                    tracing::warn!("User {} denied switch to tenant {}", user_id, tenant_id);
                    return Err(AccessError::Unauthorized);
                }
            }
        }

        let token = self.codec.rescope(current_token, target)?;
        tracing::info!(
            "User {} switched scope to {}",
            user_id,
            target.map_or_else(|| "global".to_string(), |t| format!("tenant {}", t))
        );
        Ok(token)
    }

    /// Decide whether `user_id` may act in `scope`.
    ///
    /// Admins always pass. With a scope the user must be a member and, when
    /// `required_roles` is non-empty, hold one of them in that tenant.
    pub async fn validate_access(
        &self,
        user_id: UserId,
        scope: Option<TenantId>,
        required_roles: &[Role],
    ) -> Result<(), AccessError> {
        if self.roles.system_roles_or_empty(user_id).await.is_platform_admin() {
            return Ok(());
        }

        let Some(tenant_id) = scope else {
            return Ok(());
        };

        if !self.membership.is_member_or_deny(user_id, tenant_id).await {
            return Err(AccessError::Unauthorized);
        }

        if !required_roles.is_empty() {
            let tenant_roles = self.roles.tenant_roles_or_empty(user_id, tenant_id).await;
            if !tenant_roles.intersects(required_roles) {
                return Err(AccessError::Unauthorized);
            }
        }

        Ok(())
    }

    /// Resolve roles and membership for an authenticated context.
    ///
    /// Writes the system roles, then replaces them once with the merged set.
    /// Tenant roles are merged only for members of the scoped tenant.
    pub async fn build_context(&self, ctx: &mut ScopeContext) -> Result<(), AccessError> {
        let user_id = ctx.user_id()?;
        let scope = ctx.tenant_scope()?;

        let system = self.roles.system_roles_or_empty(user_id).await;
        ctx.set_system_roles(system.clone())?;

        let merged = match scope {
            Some(tenant_id) => {
                let member = self.membership.is_member_or_deny(user_id, tenant_id).await;
                ctx.mark_tenant_member(member);
                if member {
                    system.union(&self.roles.tenant_roles_or_empty(user_id, tenant_id).await)
                } else {
                    system
                }
            }
            None => system,
        };
        ctx.replace_roles(merged)?;

        tracing::debug!(
            "Built context for user {} with {} role(s), tenant member: {}",
            user_id,
            ctx.roles()?.len(),
            ctx.is_tenant_member()
        );
        Ok(())
    }
}
