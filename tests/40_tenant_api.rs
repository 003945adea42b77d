mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

use common::{TestApp, ALICE, BOB, CAROL, T1, T2};
use tenant_gate::types::Role;

#[tokio::test]
async fn memberships_lists_callers_tenants_in_order() -> Result<()> {
    let app = TestApp::new();
    app.store
        .add_member_at(ALICE, T2, chrono::Utc::now() + chrono::Duration::seconds(5));
    let token = app.login("alice@example.com").await?;

    let (status, body) = app.get("/api/tenant/members", Some(&token)).await?;
    assert_eq!(status, StatusCode::OK);

    let tenants: Vec<i64> = body["data"]
        .as_array()
        .map(|rows| rows.iter().filter_map(|m| m["tenant_id"].as_i64()).collect())
        .unwrap_or_default();
    assert_eq!(tenants, vec![T1.get(), T2.get()]);
    Ok(())
}

#[tokio::test]
async fn admin_adds_member() -> Result<()> {
    let app = TestApp::new();
    let admin = app.login("admin@example.com").await?;

    let uri = format!("/api/admin/tenants/{}/members/{}", T1.get(), CAROL.get());
    let (status, body) = app.post(&uri, Some(&admin), json!({})).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"], json!({ "user_id": CAROL.get(), "tenant_id": T1.get() }));

    // Idempotent
    let (status, _) = app.post(&uri, Some(&admin), json!({})).await?;
    assert_eq!(status, StatusCode::CREATED);

    let carol = app.token_for(CAROL, "carol@example.com", Some(T1))?;
    let (status, _) = app.get("/api/tenant", Some(&carol)).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn non_admin_cannot_add_member() -> Result<()> {
    let app = TestApp::new();
    let alice = app.login("alice@example.com").await?;

    let uri = format!("/api/admin/tenants/{}/members/{}", T1.get(), CAROL.get());
    let (status, _) = app.post(&uri, Some(&alice), json!({})).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(!app.state.evaluator.membership().is_member(CAROL, T1).await?);
    Ok(())
}

#[tokio::test]
async fn tenant_super_removes_member_with_roles() -> Result<()> {
    let app = TestApp::new();
    app.store.grant_tenant_role(BOB, T1, Role::Internal);
    let alice = app.login("alice@example.com").await?;
    let bob = app.login("bob@example.com").await?;

    let uri = format!("/api/tenant/members/{}", BOB.get());
    let (status, body) = app.delete(&uri, Some(&alice)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["tenant_id"], T1.get());

    let roles = app.state.evaluator.roles().tenant_roles(BOB, T1).await?;
    assert!(roles.is_empty());

    // Bob's still-valid token no longer grants access to T1
    let (status, _) = app.get("/api/tenant", Some(&bob)).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.delete(&uri, Some(&alice)).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn plain_member_cannot_remove_members() -> Result<()> {
    let app = TestApp::new();
    let bob = app.login("bob@example.com").await?;

    let uri = format!("/api/tenant/members/{}", ALICE.get());
    let (status, _) = app.delete(&uri, Some(&bob)).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(app.state.evaluator.membership().is_member(ALICE, T1).await?);
    Ok(())
}

#[tokio::test]
async fn admin_grants_and_revokes_platform_roles() -> Result<()> {
    let app = TestApp::new();
    let admin = app.login("admin@example.com").await?;
    let bob = app.login("bob@example.com").await?;

    let (status, _) = app.get("/api/admin", Some(&bob)).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let uri = format!("/api/admin/users/{}/roles/ADMIN", BOB.get());
    let (status, body) = app.put(&uri, Some(&admin)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({ "user_id": BOB.get(), "role": "ADMIN", "granted": true }));

    // Roles are resolved per request, so the existing token picks up the grant
    let (status, _) = app.get("/api/admin", Some(&bob)).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.delete(&uri, Some(&admin)).await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.get("/api/admin", Some(&bob)).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.delete(&uri, Some(&admin)).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn admin_grants_tenant_role_and_membership() -> Result<()> {
    let app = TestApp::new();
    let admin = app.login("admin@example.com").await?;
    let carol = app.token_for(CAROL, "carol@example.com", Some(T1))?;

    let uri = format!(
        "/api/admin/tenants/{}/members/{}/roles/TENANT_SUPER",
        T1.get(),
        CAROL.get()
    );
    let (status, body) = app.put(&uri, Some(&admin)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["tenant_id"], T1.get());
    assert!(app.state.evaluator.membership().is_member(CAROL, T1).await?);

    let (status, _) = app.get("/api/tenant/admin", Some(&carol)).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.delete(&uri, Some(&admin)).await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.get("/api/tenant/admin", Some(&carol)).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Revoking the role keeps the membership
    let (status, _) = app.get("/api/tenant", Some(&carol)).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn role_grants_require_admin_and_known_roles() -> Result<()> {
    let app = TestApp::new();
    let admin = app.login("admin@example.com").await?;
    let alice = app.login("alice@example.com").await?;

    let uri = format!("/api/admin/users/{}/roles/ADMIN", ALICE.get());
    let (status, _) = app.put(&uri, Some(&alice)).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(!app
        .state
        .evaluator
        .roles()
        .system_roles(ALICE)
        .await?
        .is_platform_admin());

    let uri = format!("/api/admin/users/{}/roles/AUDITOR", ALICE.get());
    let (status, body) = app.put(&uri, Some(&admin)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
    Ok(())
}
