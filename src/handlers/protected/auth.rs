// handlers/protected/auth.rs - GET /api/auth/whoami, POST /api/auth/switch

use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::auth::{Principal, ScopeContext};
use crate::middleware::{AccessToken, ApiResponse, ApiResult};
use crate::types::TenantId;

#[derive(Debug, Deserialize)]
pub struct SwitchRequest {
    /// `null` asks for the global scope
    pub tenant_id: Option<TenantId>,
}

#[derive(Debug, Serialize)]
pub struct SwitchResponse {
    pub access_token: String,
    pub tenant_id: Option<TenantId>,
}

/// GET /api/auth/whoami - Resolved principal of the current request
///
/// Expected Output:
/// ```json
/// {
///   "success": true,
///   "data": {
///     "user_id": 42,
///     "username": "user@example.com",
///     "tenant_id": 7,
///     "roles": ["TENANT_SUPER"],
///     "tenant_member": true
///   }
/// }
/// ```
pub async fn whoami(Extension(ctx): Extension<ScopeContext>) -> ApiResult<Principal> {
    Ok(ApiResponse::success(ctx.principal()?))
}

/// POST /api/auth/switch - Re-issue the access token for another scope
///
/// Expected Input:
/// ```json
/// { "tenant_id": 9 }
/// ```
///
/// Expected Output:
/// ```json
/// { "success": true, "data": { "access_token": "eyJhbGciOiJIUzI1NiI...", "tenant_id": 9 } }
/// ```
pub async fn switch(
    State(state): State<AppState>,
    Extension(ctx): Extension<ScopeContext>,
    Extension(AccessToken(token)): Extension<AccessToken>,
    Json(payload): Json<SwitchRequest>,
) -> ApiResult<SwitchResponse> {
    let access_token = state
        .evaluator
        .switch_scope(ctx.user_id()?, &token, payload.tenant_id)
        .await?;

    Ok(ApiResponse::success(SwitchResponse {
        access_token,
        tenant_id: payload.tenant_id,
    }))
}
