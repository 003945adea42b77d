#![allow(dead_code)]

use std::sync::{Arc, OnceLock};

use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use tenant_gate::auth::password::hash_password;
use tenant_gate::config::AppConfig;
use tenant_gate::database::memory::{MemoryStore, MemoryTxProvider};
use tenant_gate::types::{Role, TenantId, UserId};
use tenant_gate::{router, AppState};

pub const PASSWORD: &str = "correct horse battery staple";
pub const SECRET: &str = "integration-test-secret";

pub const T1: TenantId = TenantId::new(10);
pub const T2: TenantId = TenantId::new(20);

pub const ALICE: UserId = UserId::new(1);
pub const BOB: UserId = UserId::new(2);
pub const ADMIN: UserId = UserId::new(3);
pub const CAROL: UserId = UserId::new(4);

/// One Argon2 hash shared by every seeded user; hashing is slow in debug builds.
fn password_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| hash_password(PASSWORD).expect("hash test password"))
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::development();
    config.security.jwt_secret = SECRET.to_string();
    config
}

/// Application wired to in-process stores with a fixed fixture:
///
/// - alice: member of T1 with `TENANT_SUPER` there
/// - bob: plain member of T1
/// - admin: platform admin, no memberships
/// - carol: plain member of T2
pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub tx: MemoryTxProvider,
    pub state: AppState,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let hash = password_hash();

        store.add_user(ALICE, "alice@example.com", hash);
        store.add_user(BOB, "bob@example.com", hash);
        store.add_user(ADMIN, "admin@example.com", hash);
        store.add_user(CAROL, "carol@example.com", hash);

        store.grant_tenant_role(ALICE, T1, Role::TenantSuper);
        store.add_member_at(BOB, T1, chrono::Utc::now());
        store.grant_system_role(ADMIN, Role::PlatformAdmin);
        store.add_member_at(CAROL, T2, chrono::Utc::now());

        let tx = MemoryTxProvider::new();
        let state = AppState::in_memory(test_config(), store.clone(), tx.clone());
        let router = router(state.clone());

        Self {
            store,
            tx,
            state,
            router,
        }
    }

    /// Send a request through a fresh clone of the router.
    pub async fn send(&self, request: Request<Body>) -> Result<(StatusCode, Value)> {
        send(&self.router, request).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> Result<(StatusCode, Value)> {
        self.send(request(Method::GET, uri, token, None)?).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> Result<(StatusCode, Value)> {
        self.send(request(Method::POST, uri, token, Some(body))?).await
    }

    pub async fn put(&self, uri: &str, token: Option<&str>) -> Result<(StatusCode, Value)> {
        self.send(request(Method::PUT, uri, token, None)?).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> Result<(StatusCode, Value)> {
        self.send(request(Method::DELETE, uri, token, None)?).await
    }

    /// Log in through the HTTP surface and return the access token.
    pub async fn login(&self, email: &str) -> Result<String> {
        let (status, body) = self
            .post(
                "/auth/login",
                None,
                serde_json::json!({ "email": email, "password": PASSWORD }),
            )
            .await?;
        anyhow::ensure!(status == StatusCode::OK, "login failed: {status} {body}");
        access_token(&body)
    }

    /// Mint an access token directly, bypassing login scoping.
    pub fn token_for(&self, user_id: UserId, email: &str, tenant: Option<TenantId>) -> Result<String> {
        Ok(self.state.codec.issue_pair(user_id, email, tenant)?.access_token)
    }
}

pub fn request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Result<Request<Body>> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?,
        None => builder.body(Body::empty())?,
    };
    Ok(request)
}

pub async fn send(router: &Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    Ok((status, body))
}

pub fn access_token(body: &Value) -> Result<String> {
    body["data"]["access_token"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("no access_token in {body}"))
}
