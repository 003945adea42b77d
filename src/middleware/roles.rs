use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::app::AppState;
use crate::auth::ScopeContext;
use crate::database::transaction::BoundTx;
use crate::error::ApiError;

/// Role stage: resolves roles and membership for the authenticated context,
/// refuses scoped requests from non-members, then activates the tenant scope
/// in the bound transaction.
pub async fn resolve_roles(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let tx = request
        .extensions()
        .get::<BoundTx>()
        .cloned()
        .ok_or_else(|| {
            tracing::error!("Role stage reached without a bound transaction");
            ApiError::internal_server_error("No transaction bound to request")
        })?;

    let ctx = request
        .extensions_mut()
        .get_mut::<ScopeContext>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    state.evaluator.build_context(ctx).await?;

    let scope = ctx.tenant_scope()?;
    if let Some(tenant_id) = scope {
        if !ctx.is_tenant_member() && !ctx.is_platform_admin() {
            tracing::warn!(
                "User {} denied access to tenant {}: not a member",
                ctx.user_id()?,
                tenant_id
            );
            return Err(ApiError::forbidden("Not a member of this tenant"));
        }
    }

    if let Err(e) = tx.activate_scope(scope).await {
        tracing::error!("Failed to activate tenant scope: {}", e);
        return Err(ApiError::internal_server_error("Failed to activate tenant scope"));
    }

    Ok(next.run(request).await)
}
