use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::auth::{
    AccessEvaluator, Argon2Verifier, MembershipOracle, PasswordVerifier, RoleResolver, TokenCodec,
};
use crate::config::AppConfig;
use crate::database::memory::{MemoryStore, MemoryTxProvider};
use crate::database::postgres::PgStore;
use crate::database::store::{MembershipStore, PrincipalStore, RoleAssignmentStore};
use crate::database::transaction::{PgTxProvider, TxProvider};
use crate::handlers::{protected, public};
use crate::middleware::{
    authenticate, bind_transaction, require_admin, require_tenant_context, require_tenant_member,
    require_tenant_super, resolve_roles, tenant_path_override, with_security_headers,
};

/// Everything the request pipeline needs, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub codec: Arc<TokenCodec>,
    pub evaluator: Arc<AccessEvaluator>,
    pub tx_provider: Arc<dyn TxProvider>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        principals: Arc<dyn PrincipalStore>,
        roles: Arc<dyn RoleAssignmentStore>,
        memberships: Arc<dyn MembershipStore>,
        passwords: Arc<dyn PasswordVerifier>,
        tx_provider: Arc<dyn TxProvider>,
    ) -> Self {
        let codec = Arc::new(TokenCodec::new(&config.security));
        let evaluator = Arc::new(AccessEvaluator::new(
            principals,
            passwords,
            RoleResolver::new(roles),
            MembershipOracle::new(memberships),
            codec.clone(),
        ));

        Self {
            config: Arc::new(config),
            codec,
            evaluator,
            tx_provider,
        }
    }

    /// PostgreSQL-backed stores and transactions sharing one pool.
    pub fn postgres(config: AppConfig, pool: PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool.clone()));
        let tx_provider = Arc::new(PgTxProvider::new(pool, &config.database.tenant_setting));
        Self::new(
            config,
            store.clone(),
            store.clone(),
            store,
            Arc::new(Argon2Verifier),
            tx_provider,
        )
    }

    /// In-process stores and a recording transaction provider.
    pub fn in_memory(config: AppConfig, store: Arc<MemoryStore>, tx_provider: MemoryTxProvider) -> Self {
        Self::new(
            config,
            store.clone(),
            store.clone(),
            store,
            Arc::new(Argon2Verifier),
            Arc::new(tx_provider),
        )
    }
}

/// Public routes run no tenant-scoped queries and are not bound to a transaction.
pub fn router(state: AppState) -> Router {
    let routes = Router::new()
        .merge(public_routes())
        .merge(with_request_chain(protected_routes(), state.clone()));

    with_outer_layers(routes, state)
}

/// Wraps `routes` in the protected request chain. Layers added last run first:
/// bind_transaction -> authenticate -> tenant_path_override -> resolve_roles.
pub fn with_request_chain(routes: Router<AppState>, state: AppState) -> Router<AppState> {
    routes
        .layer(from_fn_with_state(state.clone(), resolve_roles))
        .layer(from_fn(tenant_path_override))
        .layer(from_fn_with_state(state.clone(), authenticate))
        .layer(from_fn_with_state(state, bind_transaction))
}

/// Attaches state plus the process-wide layers: timeout, panic recovery,
/// security headers, request tracing and optional CORS.
pub fn with_outer_layers(routes: Router<AppState>, state: AppState) -> Router {
    let app = routes
        .with_state(state.clone())
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(CatchPanicLayer::new());

    let mut app = with_security_headers(app, &state.config.security).layer(TraceLayer::new_for_http());

    if state.config.api.enable_cors {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(public::health::health))
        .route("/auth/login", post(public::auth::login))
        .route("/auth/refresh", post(public::auth::refresh))
        .route("/auth/logout", post(public::auth::logout))
}

fn protected_routes() -> Router<AppState> {
    use protected::{admin, auth, tenant};

    Router::new()
        // Session
        .route("/api/auth/whoami", get(auth::whoami))
        .route("/api/auth/switch", post(auth::switch))
        // Tenant scoped
        .route(
            "/api/tenant",
            get(tenant::current)
                .route_layer(from_fn(require_tenant_member))
                .route_layer(from_fn(require_tenant_context)),
        )
        .route("/api/tenant/members", get(tenant::memberships))
        .route(
            "/api/tenant/admin",
            get(tenant::admin_overview).route_layer(from_fn(require_tenant_super)),
        )
        .route(
            "/api/tenant/members/:user_id",
            delete(tenant::remove_member).route_layer(from_fn(require_tenant_super)),
        )
        .route(
            "/api/tenants/:tenant_id",
            get(tenant::show).route_layer(from_fn(require_tenant_member)),
        )
        // Platform admin
        .route(
            "/api/admin",
            get(admin::overview).route_layer(from_fn(require_admin)),
        )
        .route(
            "/api/admin/tenants/:tenant_id/members/:user_id",
            post(admin::add_member).route_layer(from_fn(require_admin)),
        )
        .route(
            "/api/admin/users/:user_id/roles/:role",
            put(admin::grant_system_role)
                .delete(admin::revoke_system_role)
                .route_layer(from_fn(require_admin)),
        )
        .route(
            "/api/admin/tenants/:tenant_id/members/:user_id/roles/:role",
            put(admin::grant_tenant_role)
                .delete(admin::revoke_tenant_role)
                .route_layer(from_fn(require_admin)),
        )
}
