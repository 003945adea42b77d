//! Route gates.
//!
//! Each gate is a pure check over the `ScopeContext` built by the role stage;
//! they perform no I/O and can be stacked in any order.

use axum::{extract::Request, middleware::Next, response::Response};

use crate::auth::ScopeContext;
use crate::error::ApiError;
use crate::types::Role;

pub fn check_admin(ctx: &ScopeContext) -> Result<(), ApiError> {
    ctx.roles()?;
    if !ctx.is_platform_admin() {
        return Err(ApiError::forbidden("Admin access required"));
    }
    Ok(())
}

pub fn check_tenant_context(ctx: &ScopeContext) -> Result<(), ApiError> {
    if ctx.tenant_scope()?.is_none() {
        return Err(ApiError::forbidden("Tenant context required"));
    }
    Ok(())
}

pub fn check_tenant_member(ctx: &ScopeContext) -> Result<(), ApiError> {
    check_tenant_context(ctx)?;
    ctx.roles()?;
    if ctx.is_platform_admin() || ctx.is_tenant_member() {
        return Ok(());
    }
    Err(ApiError::forbidden("Tenant membership required"))
}

pub fn check_tenant_super(ctx: &ScopeContext) -> Result<(), ApiError> {
    check_tenant_context(ctx)?;
    let roles = ctx.roles()?;
    if roles.is_platform_admin() || (ctx.is_tenant_member() && roles.contains(Role::TenantSuper)) {
        return Ok(());
    }
    Err(ApiError::forbidden("Tenant super access required"))
}

fn context(request: &Request) -> Result<&ScopeContext, ApiError> {
    request
        .extensions()
        .get::<ScopeContext>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))
}

pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    check_admin(context(&request)?)?;
    Ok(next.run(request).await)
}

pub async fn require_tenant_context(request: Request, next: Next) -> Result<Response, ApiError> {
    check_tenant_context(context(&request)?)?;
    Ok(next.run(request).await)
}

pub async fn require_tenant_member(request: Request, next: Next) -> Result<Response, ApiError> {
    check_tenant_member(context(&request)?)?;
    Ok(next.run(request).await)
}

pub async fn require_tenant_super(request: Request, next: Next) -> Result<Response, ApiError> {
    check_tenant_super(context(&request)?)?;
    Ok(next.run(request).await)
}
