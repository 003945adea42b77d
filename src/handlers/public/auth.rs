// handlers/public/auth.rs - POST /auth/login, /auth/refresh, /auth/logout

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::config::SecurityConfig;
use crate::middleware::{ApiResponse, ApiResult};
use crate::types::{TenantId, UserId};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub user_id: UserId,
    pub tenant_id: Option<TenantId>,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub logged_out: bool,
}

/// POST /auth/login - Authenticate by email and password
///
/// The access token is scoped to the user's earliest tenant membership and is
/// also set as the auth cookie.
///
/// Expected Input:
/// ```json
/// { "email": "user@example.com", "password": "secret" }
/// ```
///
/// Expected Output:
/// ```json
/// {
///   "success": true,
///   "data": {
///     "access_token": "eyJhbGciOiJIUzI1NiI...",
///     "refresh_token": "eyJhbGciOiJIUzI1NiI...",
///     "expires_in": 86400,
///     "user_id": 42,
///     "tenant_id": 7
///   }
/// }
/// ```
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<LoginResponse> {
    let outcome = state.evaluator.login(&payload.email, &payload.password).await?;

    let cookie = auth_cookie(
        &state.config.security,
        &outcome.tokens.access_token,
        outcome.tokens.expires_in,
    );

    Ok(ApiResponse::success(LoginResponse {
        access_token: outcome.tokens.access_token,
        refresh_token: outcome.tokens.refresh_token,
        expires_in: outcome.tokens.expires_in,
        user_id: outcome.user_id,
        tenant_id: outcome.tenant_id,
    })
    .with_cookie(cookie))
}

/// POST /auth/refresh - Exchange a refresh token for a new pair
///
/// Expected Input:
/// ```json
/// { "refresh_token": "eyJhbGciOiJIUzI1NiI...", "tenant_id": 7 }
/// ```
///
/// `tenant_id` is optional; without it the new access token is scoped like a
/// fresh login.
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> ApiResult<crate::auth::TokenPair> {
    let pair = state
        .evaluator
        .refresh(&payload.refresh_token, payload.tenant_id)
        .await?;

    let cookie = auth_cookie(&state.config.security, &pair.access_token, pair.expires_in);
    Ok(ApiResponse::success(pair).with_cookie(cookie))
}

/// POST /auth/logout - Clear the auth cookie
pub async fn logout(State(state): State<AppState>) -> ApiResult<LogoutResponse> {
    let cookie = auth_cookie(&state.config.security, "", 0);
    Ok(ApiResponse::success(LogoutResponse { logged_out: true }).with_cookie(cookie))
}

fn auth_cookie(security: &SecurityConfig, value: &str, max_age: i64) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        security.cookie_name, value, max_age
    );
    if security.cookie_secure {
        cookie.push_str("; Secure");
    }
    cookie
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn cookie_attributes() {
        let mut security = AppConfig::development().security;
        assert_eq!(
            auth_cookie(&security, "abc", 60),
            "auth_token=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=60"
        );

        security.cookie_secure = true;
        assert!(auth_cookie(&security, "", 0).ends_with("Max-Age=0; Secure"));
    }
}
