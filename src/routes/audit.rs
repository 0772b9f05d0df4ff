//! Read side of the permission audit log.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::app::AppState;
use crate::authz::{actions, resources};
use crate::errors::AppError;
use crate::jwt::AuthUser;
use crate::models::audit::{AuditRangeQuery, FailureCountResponse, PermissionAudit};
use crate::routes::authorize;

const DEFAULT_FAILURE_WINDOW_HOURS: i64 = 24;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/audit", get(audit_between))
        .route("/audit/denied", get(denied))
        .route("/audit/permissions/:resource/:action", get(by_permission))
        .route("/audit/users/:username", get(by_user))
        .route("/audit/users/:username/failures", get(recent_failures))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FailureWindow {
    /// Look-back window in hours, default 24
    pub hours: Option<i64>,
}

/// Decisions recorded for one username, newest first
#[utoipa::path(
    get,
    path = "/rbac/audit/users/{username}",
    tag = "Audit",
    params(
        ("username" = String, Path, description = "Username"),
    ),
    responses(
        (status = 200, description = "Audit records", body = Vec<PermissionAudit>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn by_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(username): Path<String>,
) -> Result<Json<Vec<PermissionAudit>>, AppError> {
    authorize(&state, &auth, resources::AUDIT, actions::VIEW).await?;
    Ok(Json(state.audit_log.by_username(&username).await?))
}

/// Denied decisions only, newest first
#[utoipa::path(
    get,
    path = "/rbac/audit/denied",
    tag = "Audit",
    responses(
        (status = 200, description = "Denied decisions", body = Vec<PermissionAudit>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn denied(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Vec<PermissionAudit>>, AppError> {
    authorize(&state, &auth, resources::AUDIT, actions::VIEW).await?;
    Ok(Json(state.audit_log.denied().await?))
}

/// Decisions recorded for one `RESOURCE:ACTION` pair, newest first
#[utoipa::path(
    get,
    path = "/rbac/audit/permissions/{resource}/{action}",
    tag = "Audit",
    params(
        ("resource" = String, Path, description = "Resource"),
        ("action" = String, Path, description = "Action"),
    ),
    responses(
        (status = 200, description = "Audit records", body = Vec<PermissionAudit>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn by_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((resource, action)): Path<(String, String)>,
) -> Result<Json<Vec<PermissionAudit>>, AppError> {
    authorize(&state, &auth, resources::AUDIT, actions::VIEW).await?;
    Ok(Json(state.audit_log.by_resource_action(&resource, &action).await?))
}

/// Decisions recorded between two instants (inclusive), newest first
#[utoipa::path(
    get,
    path = "/rbac/audit",
    tag = "Audit",
    params(AuditRangeQuery),
    responses(
        (status = 200, description = "Audit records", body = Vec<PermissionAudit>),
        (status = 400, description = "start is after end"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn audit_between(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(range): Query<AuditRangeQuery>,
) -> Result<Json<Vec<PermissionAudit>>, AppError> {
    authorize(&state, &auth, resources::AUDIT, actions::VIEW).await?;
    if range.start > range.end {
        return Err(AppError::bad_request("start must not be after end"));
    }
    Ok(Json(state.audit_log.between(range.start, range.end).await?))
}

/// Count of denied decisions for a user over the last `hours` hours
#[utoipa::path(
    get,
    path = "/rbac/audit/users/{username}/failures",
    tag = "Audit",
    params(
        ("username" = String, Path, description = "Username"),
        FailureWindow,
    ),
    responses(
        (status = 200, description = "Failure count", body = FailureCountResponse),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn recent_failures(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(username): Path<String>,
    Query(window): Query<FailureWindow>,
) -> Result<Json<FailureCountResponse>, AppError> {
    authorize(&state, &auth, resources::AUDIT, actions::VIEW).await?;

    let hours = window.hours.unwrap_or(DEFAULT_FAILURE_WINDOW_HOURS);
    if hours <= 0 {
        return Err(AppError::bad_request("hours must be positive"));
    }

    let user = state
        .rbac
        .find_user(&username)
        .await?
        .ok_or_else(|| AppError::user_not_found(&username))?;
    let failures = state.audit_log.count_recent_failures(user.id, hours).await?;

    Ok(Json(FailureCountResponse {
        username: user.username,
        user_id: user.id,
        hours,
        failures,
    }))
}
