// handlers/protected/admin.rs - platform administration

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension,
};
use serde::Serialize;

use crate::app::AppState;
use crate::auth::{Principal, ScopeContext};
use crate::middleware::{ApiResponse, ApiResult};
use crate::types::{Role, TenantId, UserId};

#[derive(Debug, Serialize)]
pub struct AdminOverview {
    pub principal: Principal,
    pub scope: &'static str,
}

#[derive(Debug, Serialize)]
pub struct MemberAdded {
    pub user_id: UserId,
    pub tenant_id: TenantId,
}

/// GET /api/admin - Platform administration overview
pub async fn overview(Extension(ctx): Extension<ScopeContext>) -> ApiResult<AdminOverview> {
    let principal = ctx.principal()?;
    let scope = if principal.tenant_id.is_some() { "tenant" } else { "global" };
    Ok(ApiResponse::success(AdminOverview { principal, scope }))
}

/// POST /api/admin/tenants/:tenant_id/members/:user_id - Add a tenant member
///
/// Adding an existing member is a no-op.
///
/// Expected Output (201):
/// ```json
/// { "success": true, "data": { "user_id": 43, "tenant_id": 7 } }
/// ```
pub async fn add_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<ScopeContext>,
    Path((tenant_id, user_id)): Path<(i64, i64)>,
) -> ApiResult<MemberAdded> {
    let tenant_id = TenantId::new(tenant_id);
    let user_id = UserId::new(user_id);

    state.evaluator.membership().add_member(user_id, tenant_id).await?;

    tracing::info!(
        "Admin {} added user {} to tenant {}",
        ctx.user_id()?,
        user_id,
        tenant_id
    );

    Ok(ApiResponse::with_status(
        MemberAdded { user_id, tenant_id },
        StatusCode::CREATED,
    ))
}

#[derive(Debug, Serialize)]
pub struct RoleGrant {
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    pub role: Role,
    pub granted: bool,
}

/// PUT /api/admin/users/:user_id/roles/:role - Grant a platform role
///
/// Granting a role the user already holds is a no-op.
///
/// Expected Output:
/// ```json
/// { "success": true, "data": { "user_id": 43, "role": "INTERNAL", "granted": true } }
/// ```
pub async fn grant_system_role(
    State(state): State<AppState>,
    Extension(ctx): Extension<ScopeContext>,
    Path((user_id, role)): Path<(i64, String)>,
) -> ApiResult<RoleGrant> {
    let user_id = UserId::new(user_id);
    let role: Role = role.parse()?;

    state.evaluator.roles().assign_system_role(user_id, role).await?;
    tracing::info!("Admin {} granted {} to user {}", ctx.user_id()?, role, user_id);

    Ok(ApiResponse::success(RoleGrant { user_id, tenant_id: None, role, granted: true }))
}

/// DELETE /api/admin/users/:user_id/roles/:role - Revoke a platform role
///
/// 404 when the user does not hold the role.
pub async fn revoke_system_role(
    State(state): State<AppState>,
    Extension(ctx): Extension<ScopeContext>,
    Path((user_id, role)): Path<(i64, String)>,
) -> ApiResult<RoleGrant> {
    let user_id = UserId::new(user_id);
    let role: Role = role.parse()?;

    state.evaluator.roles().revoke_system_role(user_id, role).await?;
    tracing::info!("Admin {} revoked {} from user {}", ctx.user_id()?, role, user_id);

    Ok(ApiResponse::success(RoleGrant { user_id, tenant_id: None, role, granted: false }))
}

/// PUT /api/admin/tenants/:tenant_id/members/:user_id/roles/:role - Grant a tenant role
///
/// Adds the tenant membership first when the user is not yet a member.
pub async fn grant_tenant_role(
    State(state): State<AppState>,
    Extension(ctx): Extension<ScopeContext>,
    Path((tenant_id, user_id, role)): Path<(i64, i64, String)>,
) -> ApiResult<RoleGrant> {
    let tenant_id = TenantId::new(tenant_id);
    let user_id = UserId::new(user_id);
    let role: Role = role.parse()?;

    state
        .evaluator
        .roles()
        .assign_tenant_role(user_id, tenant_id, role)
        .await?;
    tracing::info!(
        "Admin {} granted {} to user {} in tenant {}",
        ctx.user_id()?,
        role,
        user_id,
        tenant_id
    );

    Ok(ApiResponse::success(RoleGrant {
        user_id,
        tenant_id: Some(tenant_id),
        role,
        granted: true,
    }))
}

/// DELETE /api/admin/tenants/:tenant_id/members/:user_id/roles/:role - Revoke a tenant role
///
/// The membership itself is kept.
pub async fn revoke_tenant_role(
    State(state): State<AppState>,
    Extension(ctx): Extension<ScopeContext>,
    Path((tenant_id, user_id, role)): Path<(i64, i64, String)>,
) -> ApiResult<RoleGrant> {
    let tenant_id = TenantId::new(tenant_id);
    let user_id = UserId::new(user_id);
    let role: Role = role.parse()?;

    state
        .evaluator
        .roles()
        .revoke_tenant_role(user_id, tenant_id, role)
        .await?;
    tracing::info!(
        "Admin {} revoked {} from user {} in tenant {}",
        ctx.user_id()?,
        role,
        user_id,
        tenant_id
    );

    Ok(ApiResponse::success(RoleGrant {
        user_id,
        tenant_id: Some(tenant_id),
        role,
        granted: false,
    }))
}
