// handlers/protected/tenant.rs - tenant scoped endpoints

use axum::{
    extract::{Path, State},
    Extension,
};
use serde::Serialize;

use crate::app::AppState;
use crate::auth::{Principal, ScopeContext};
use crate::database::store::Membership;
use crate::database::transaction::BoundTx;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::types::{TenantId, UserId};

#[derive(Debug, Serialize)]
pub struct TenantView {
    pub tenant_id: Option<TenantId>,
    /// Filter value read back from the bound transaction's session
    pub session_scope: Option<TenantId>,
    pub principal: Principal,
}

#[derive(Debug, Serialize)]
pub struct MemberRemoved {
    pub user_id: UserId,
    pub tenant_id: TenantId,
}

async fn tenant_view(ctx: &ScopeContext, tx: &BoundTx) -> Result<TenantView, ApiError> {
    let session_scope = tx.current_scope().await?;
    Ok(TenantView {
        tenant_id: ctx.tenant_scope()?,
        session_scope,
        principal: ctx.principal()?,
    })
}

/// GET /api/tenant - Current tenant scope
///
/// Expected Output:
/// ```json
/// {
///   "success": true,
///   "data": { "tenant_id": 7, "session_scope": 7, "principal": { "user_id": 42, ... } }
/// }
/// ```
pub async fn current(
    Extension(ctx): Extension<ScopeContext>,
    Extension(tx): Extension<BoundTx>,
) -> ApiResult<TenantView> {
    Ok(ApiResponse::success(tenant_view(&ctx, &tx).await?))
}

/// GET /api/tenant/members - Tenants the caller belongs to, earliest first
pub async fn memberships(
    State(state): State<AppState>,
    Extension(ctx): Extension<ScopeContext>,
) -> ApiResult<Vec<Membership>> {
    let memberships = state.evaluator.membership().memberships(ctx.user_id()?).await?;
    Ok(ApiResponse::success(memberships))
}

/// GET /api/tenant/admin - Tenant administration overview
pub async fn admin_overview(
    Extension(ctx): Extension<ScopeContext>,
    Extension(tx): Extension<BoundTx>,
) -> ApiResult<TenantView> {
    let view = tenant_view(&ctx, &tx).await?;
    tracing::debug!(
        "Tenant admin overview for {:?} by user {}",
        view.tenant_id,
        view.principal.user_id
    );
    Ok(ApiResponse::success(view))
}

/// DELETE /api/tenant/members/:user_id - Remove a member from the current tenant
///
/// The member's tenant roles are removed with the membership.
///
/// Expected Output:
/// ```json
/// { "success": true, "data": { "user_id": 43, "tenant_id": 7 } }
/// ```
pub async fn remove_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<ScopeContext>,
    Path(user_id): Path<i64>,
) -> ApiResult<MemberRemoved> {
    let tenant_id = ctx
        .tenant_scope()?
        .ok_or_else(|| ApiError::forbidden("Tenant context required"))?;
    let user_id = UserId::new(user_id);

    state
        .evaluator
        .membership()
        .remove_member(user_id, tenant_id)
        .await?;

    tracing::info!(
        "User {} removed user {} from tenant {}",
        ctx.user_id()?,
        user_id,
        tenant_id
    );

    Ok(ApiResponse::success(MemberRemoved { user_id, tenant_id }))
}

/// GET /api/tenants/:tenant_id - Tenant view with the scope taken from the path
pub async fn show(
    Extension(ctx): Extension<ScopeContext>,
    Extension(tx): Extension<BoundTx>,
    Path(tenant_id): Path<i64>,
) -> ApiResult<TenantView> {
    let view = tenant_view(&ctx, &tx).await?;
    if view.tenant_id != Some(TenantId::new(tenant_id)) {
        return Err(ApiError::internal_server_error("Path scope was not applied"));
    }
    Ok(ApiResponse::success(view))
}
