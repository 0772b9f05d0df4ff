use std::sync::Arc;

use axum::http::Method;
use axum::routing::get;
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::audit::{AuditSink, AuditStore};
use crate::authz::{AccessDecisionPoint, PermissionCache, PermissionResolver, RbacService};
use crate::db::audit::SqliteAuditLog;
use crate::errors::AppError;
use crate::jwt::JwtConfig;
use crate::routes::{audit, health, rbac};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub rbac: Arc<RbacService>,
    pub access: AccessDecisionPoint,
    pub audit_log: SqliteAuditLog,
}

impl AppState {
    /// Wires resolver, cache, mutation service and decision point over one
    /// pool, and starts the audit writer on the current runtime.
    pub fn new(pool: SqlitePool, jwt: JwtConfig) -> Self {
        let audit_log = SqliteAuditLog::new(pool.clone());
        let store: Arc<dyn AuditStore> = Arc::new(audit_log.clone());
        let (sink, _writer) = AuditSink::spawn(store);

        let cache = Arc::new(PermissionCache::new(PermissionResolver::new(pool.clone())));
        let rbac = Arc::new(RbacService::new(pool.clone(), Arc::clone(&cache)));
        let access = AccessDecisionPoint::new(cache, sink);

        Self {
            pool,
            jwt: Arc::new(jwt),
            rbac,
            access,
            audit_log,
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let state = AppState::new(pool, jwt_config);

    Ok(router(state))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health::health))
        .nest("/rbac", rbac::routes().merge(audit::routes()))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
