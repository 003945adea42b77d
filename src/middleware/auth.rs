use axum::{
    extract::{RawPathParams, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::app::AppState;
use crate::auth::ScopeContext;
use crate::error::ApiError;
use crate::types::TenantId;

/// Raw bearer token of the current request, kept for re-scoping.
#[derive(Clone, Debug)]
pub struct AccessToken(pub String);

/// Validates the bearer token and seeds the request's `ScopeContext`.
///
/// The token comes from `Authorization: Bearer <token>`, or from the auth
/// cookie when that header is absent.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(request.headers(), &state.config.security.cookie_name)
        .map_err(ApiError::unauthorized)?;

    let claims = state.codec.validate(&token)?;

    let mut ctx = ScopeContext::new();
    ctx.set_user_id(claims.user_id)?;
    ctx.set_username(claims.username)?;
    ctx.set_tenant_scope(claims.tenant_id)?;

    tracing::debug!(
        "Authenticated user {} (token scope: {:?})",
        claims.user_id,
        claims.tenant_id
    );

    request.extensions_mut().insert(ctx);
    request.extensions_mut().insert(AccessToken(token));

    Ok(next.run(request).await)
}

/// Overrides the token's tenant scope with a `:tenant_id` path segment, for
/// this request only.
pub async fn tenant_path_override(
    params: Option<RawPathParams>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let path_tenant = params.and_then(|params| {
        params
            .iter()
            .find(|(key, _)| *key == "tenant_id")
            .map(|(_, value)| value.to_string())
    });

    if let Some(raw) = path_tenant {
        let tenant_id: TenantId = raw
            .parse()
            .map_err(|_| ApiError::bad_request(format!("Invalid tenant id '{}'", raw)))?;

        let ctx = request
            .extensions_mut()
            .get_mut::<ScopeContext>()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
        ctx.override_tenant_scope(tenant_id)?;

        tracing::debug!("Tenant scope overridden from path: {}", tenant_id);
    }

    Ok(next.run(request).await)
}

/// Extract the bearer token from the Authorization header, falling back to
/// the named cookie only when the header is absent.
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Result<String, &'static str> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| "Invalid Authorization header format")?;

        let token = auth_str
            .strip_prefix("Bearer ")
            .ok_or("Authorization header must use Bearer token format")?
            .trim();

        if token.is_empty() {
            return Err("Empty bearer token");
        }
        return Ok(token.to_string());
    }

    cookie_value(headers, cookie_name)
        .filter(|value| !value.is_empty())
        .ok_or("Missing authentication token")
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn bearer_header_wins_over_cookie() {
        let map = headers(&[
            (header::AUTHORIZATION, "Bearer header-token"),
            (header::COOKIE, "auth_token=cookie-token"),
        ]);
        assert_eq!(extract_token(&map, "auth_token").unwrap(), "header-token");
    }

    #[test]
    fn cookie_is_used_when_header_absent() {
        let map = headers(&[(header::COOKIE, "theme=dark; auth_token=cookie-token; lang=en")]);
        assert_eq!(extract_token(&map, "auth_token").unwrap(), "cookie-token");
    }

    #[test]
    fn malformed_header_does_not_fall_back() {
        let map = headers(&[
            (header::AUTHORIZATION, "Basic dXNlcjpwdw=="),
            (header::COOKIE, "auth_token=cookie-token"),
        ]);
        assert!(extract_token(&map, "auth_token").is_err());

        let map = headers(&[(header::AUTHORIZATION, "Bearer   ")]);
        assert!(extract_token(&map, "auth_token").is_err());
    }

    #[test]
    fn missing_everything() {
        assert!(extract_token(&HeaderMap::new(), "auth_token").is_err());
        let map = headers(&[(header::COOKIE, "auth_token=")]);
        assert!(extract_token(&map, "auth_token").is_err());
    }
}
