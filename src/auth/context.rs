//! Per-request scope context.
//!
//! A `ScopeContext` is seeded by the authentication middleware, completed by
//! the role stage and read by route gates and handlers. It lives in the
//! request extensions and is never shared between requests.

use serde::Serialize;
use thiserror::Error;

use crate::types::{RoleSet, TenantId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("user id not present in request context")]
    MissingUserId,

    #[error("username not present in request context")]
    MissingUsername,

    #[error("tenant scope not present in request context")]
    MissingTenantScope,

    #[error("roles not present in request context")]
    MissingRoles,

    #[error("{0} is already set for this request")]
    AlreadySet(&'static str),

    #[error("roles have already been replaced for this request")]
    RolesAlreadyMerged,

    #[error("tenant scope can no longer change once roles are resolved")]
    ScopeSealed,
}

/// Resolved identity, scope and roles for one request.
///
/// Every field is written at most once. Roles are the exception: the system
/// roles are written first and then replaced exactly once by the merged set.
/// `tenant_scope` distinguishes "not yet seeded" (`None`) from "seeded as
/// global" (`Some(None)`).
#[derive(Debug, Clone, Default)]
pub struct ScopeContext {
    user_id: Option<UserId>,
    username: Option<String>,
    tenant_scope: Option<Option<TenantId>>,
    roles: Option<RoleSet>,
    roles_merged: bool,
    tenant_member: bool,
}

impl ScopeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_id(&self) -> Result<UserId, ContextError> {
        self.user_id.ok_or(ContextError::MissingUserId)
    }

    pub fn set_user_id(&mut self, user_id: UserId) -> Result<(), ContextError> {
        if self.user_id.is_some() {
            return Err(ContextError::AlreadySet("user id"));
        }
        self.user_id = Some(user_id);
        Ok(())
    }

    pub fn username(&self) -> Result<&str, ContextError> {
        self.username.as_deref().ok_or(ContextError::MissingUsername)
    }

    pub fn set_username(&mut self, username: impl Into<String>) -> Result<(), ContextError> {
        if self.username.is_some() {
            return Err(ContextError::AlreadySet("username"));
        }
        self.username = Some(username.into());
        Ok(())
    }

    /// `Ok(None)` means the request is global (unscoped).
    pub fn tenant_scope(&self) -> Result<Option<TenantId>, ContextError> {
        self.tenant_scope.ok_or(ContextError::MissingTenantScope)
    }

    pub fn set_tenant_scope(&mut self, scope: Option<TenantId>) -> Result<(), ContextError> {
        if self.tenant_scope.is_some() {
            return Err(ContextError::AlreadySet("tenant scope"));
        }
        self.tenant_scope = Some(scope);
        Ok(())
    }

    /// Replace the token's scope with one taken from the request path.
    ///
    /// Only allowed after authentication and before roles are resolved.
    pub fn override_tenant_scope(&mut self, tenant: TenantId) -> Result<(), ContextError> {
        if self.tenant_scope.is_none() {
            return Err(ContextError::MissingTenantScope);
        }
        if self.roles.is_some() {
            return Err(ContextError::ScopeSealed);
        }
        self.tenant_scope = Some(Some(tenant));
        Ok(())
    }

    pub fn roles(&self) -> Result<&RoleSet, ContextError> {
        self.roles.as_ref().ok_or(ContextError::MissingRoles)
    }

    /// First write of the role set (platform-wide roles only).
    pub fn set_system_roles(&mut self, roles: RoleSet) -> Result<(), ContextError> {
        if self.roles.is_some() {
            return Err(ContextError::AlreadySet("roles"));
        }
        self.roles = Some(roles);
        Ok(())
    }

    /// Single replacement of the role set with the merged system + tenant roles.
    pub fn replace_roles(&mut self, merged: RoleSet) -> Result<(), ContextError> {
        if self.roles.is_none() {
            return Err(ContextError::MissingRoles);
        }
        if self.roles_merged {
            return Err(ContextError::RolesAlreadyMerged);
        }
        self.roles = Some(merged);
        self.roles_merged = true;
        Ok(())
    }

    pub fn roles_resolved(&self) -> bool {
        self.roles_merged
    }

    pub fn mark_tenant_member(&mut self, member: bool) {
        self.tenant_member = member;
    }

    /// True once the role stage confirmed membership in the scoped tenant.
    pub fn is_tenant_member(&self) -> bool {
        self.tenant_member
    }

    pub fn is_platform_admin(&self) -> bool {
        self.roles.as_ref().is_some_and(RoleSet::is_platform_admin)
    }

    pub fn principal(&self) -> Result<Principal, ContextError> {
        Ok(Principal {
            user_id: self.user_id()?,
            username: self.username()?.to_string(),
            tenant_id: self.tenant_scope()?,
            roles: self.roles()?.clone(),
            tenant_member: self.tenant_member,
        })
    }
}

/// Read-only snapshot of the resolved principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub user_id: UserId,
    pub username: String,
    pub tenant_id: Option<TenantId>,
    pub roles: RoleSet,
    pub tenant_member: bool,
}

impl Principal {
    pub fn is_platform_admin(&self) -> bool {
        self.roles.is_platform_admin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn seeded() -> ScopeContext {
        let mut ctx = ScopeContext::new();
        ctx.set_user_id(UserId::new(1)).unwrap();
        ctx.set_username("ada@example.com").unwrap();
        ctx.set_tenant_scope(Some(TenantId::new(10))).unwrap();
        ctx
    }

    #[test]
    fn getters_fail_when_unset() {
        let ctx = ScopeContext::new();
        assert_eq!(ctx.user_id(), Err(ContextError::MissingUserId));
        assert_eq!(ctx.username(), Err(ContextError::MissingUsername));
        assert_eq!(ctx.tenant_scope(), Err(ContextError::MissingTenantScope));
        assert_eq!(ctx.roles().unwrap_err(), ContextError::MissingRoles);
        assert!(!ctx.is_platform_admin());
    }

    #[test]
    fn global_scope_is_distinct_from_unset() {
        let mut ctx = ScopeContext::new();
        ctx.set_tenant_scope(None).unwrap();
        assert_eq!(ctx.tenant_scope(), Ok(None));
    }

    #[test]
    fn identity_fields_are_write_once() {
        let mut ctx = seeded();
        assert_eq!(ctx.set_user_id(UserId::new(2)), Err(ContextError::AlreadySet("user id")));
        assert_eq!(ctx.set_tenant_scope(None), Err(ContextError::AlreadySet("tenant scope")));
        assert_eq!(ctx.user_id(), Ok(UserId::new(1)));
    }

    #[test]
    fn roles_are_replaced_exactly_once() {
        let mut ctx = seeded();
        assert_eq!(ctx.replace_roles(RoleSet::new()), Err(ContextError::MissingRoles));

        ctx.set_system_roles(RoleSet::from([Role::Internal])).unwrap();
        assert!(!ctx.roles_resolved());

        ctx.replace_roles(RoleSet::from([Role::Internal, Role::TenantSuper]))
            .unwrap();
        assert!(ctx.roles_resolved());
        assert!(ctx.roles().unwrap().contains(Role::TenantSuper));

        assert_eq!(ctx.replace_roles(RoleSet::new()), Err(ContextError::RolesAlreadyMerged));
        assert_eq!(
            ctx.set_system_roles(RoleSet::new()),
            Err(ContextError::AlreadySet("roles"))
        );
    }

    #[test]
    fn path_override_is_sealed_after_roles() {
        let mut ctx = seeded();
        ctx.override_tenant_scope(TenantId::new(11)).unwrap();
        assert_eq!(ctx.tenant_scope(), Ok(Some(TenantId::new(11))));

        ctx.set_system_roles(RoleSet::new()).unwrap();
        assert_eq!(ctx.override_tenant_scope(TenantId::new(12)), Err(ContextError::ScopeSealed));
        assert_eq!(ctx.tenant_scope(), Ok(Some(TenantId::new(11))));
    }

    #[test]
    fn override_requires_authenticated_scope() {
        let mut ctx = ScopeContext::new();
        assert_eq!(
            ctx.override_tenant_scope(TenantId::new(1)),
            Err(ContextError::MissingTenantScope)
        );
    }

    #[test]
    fn principal_snapshot() {
        let mut ctx = seeded();
        assert!(ctx.principal().is_err());

        ctx.set_system_roles(RoleSet::from([Role::PlatformAdmin])).unwrap();
        ctx.mark_tenant_member(true);
        let principal = ctx.principal().unwrap();
        assert_eq!(principal.user_id, UserId::new(1));
        assert_eq!(principal.tenant_id, Some(TenantId::new(10)));
        assert!(principal.is_platform_admin());
        assert!(principal.tenant_member);
    }
}
