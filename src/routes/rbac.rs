//! RBAC Admin API Routes
//!
//! Endpoints for managing roles, permissions, inheritance and user assignments.
//! Every handler first asks the decision point whether the caller may act.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{actions, resources, CacheStats};
use crate::errors::AppError;
use crate::jwt::AuthUser;
use crate::models::rbac::*;
use crate::models::user::{User, UserCreateRequest};
use crate::routes::authorize;

// =============================================================================
// ROUTER
// =============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        // Roles
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/:role_id", get(get_role).put(update_role).delete(delete_role))
        .route("/roles/:role_id/permissions", post(assign_permission_to_role))
        .route("/roles/:role_id/permissions/:permission_id", delete(remove_permission_from_role))
        .route("/roles/:role_id/children", post(add_child_role))
        .route("/roles/:role_id/children/:child_id", delete(remove_child_role))
        .route("/roles/:role_id/effective-permissions", get(get_role_effective_permissions))
        // Permissions
        .route("/permissions", get(list_permissions).post(create_permission))
        .route("/permissions/:permission_id", put(update_permission).delete(delete_permission))
        // Users and role assignments
        .route("/users", get(list_users).post(create_user))
        .route("/users/:username/roles", get(get_user_roles).post(assign_role_to_user))
        .route("/users/:username/roles/:role_name", delete(revoke_role_from_user))
        .route("/users/:username/effective-permissions", get(get_effective_permissions))
        // Decisions
        .route("/check", post(check))
        .route("/cache/stats", get(cache_stats))
}

// =============================================================================
// ROLE ENDPOINTS
// =============================================================================

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RoleFilter {
    /// Only system (`true`) or only non-system (`false`) roles
    pub system: Option<bool>,
}

/// List roles
#[utoipa::path(
    get,
    path = "/rbac/roles",
    tag = "RBAC",
    params(RoleFilter),
    responses(
        (status = 200, description = "List of roles", body = Vec<Role>),
        (status = 403, description = "Caller lacks ROLE:VIEW"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_roles(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(filter): Query<RoleFilter>,
) -> Result<Json<Vec<Role>>, AppError> {
    authorize(&state, &auth, resources::ROLE, actions::VIEW).await?;
    let roles = match filter.system {
        Some(is_system) => state.rbac.list_system_roles(is_system).await?,
        None => state.rbac.list_roles().await?,
    };
    Ok(Json(roles))
}

/// Create a role, optionally inheriting existing roles and holding existing permissions
#[utoipa::path(
    post,
    path = "/rbac/roles",
    tag = "RBAC",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 404, description = "Referenced role or permission not found"),
        (status = 409, description = "Role name already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<RoleCreateRequest>,
) -> Result<(StatusCode, Json<Role>), AppError> {
    authorize(&state, &auth, resources::ROLE, actions::MANAGE).await?;
    let role = state.rbac.create_composite_role(req).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// Get a role with its direct permissions and inherited roles
#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 200, description = "Role details", body = RoleDetail),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<Uuid>,
) -> Result<Json<RoleDetail>, AppError> {
    authorize(&state, &auth, resources::ROLE, actions::VIEW).await?;
    Ok(Json(state.rbac.role_detail(role_id).await?))
}

/// Update a role's description
#[utoipa::path(
    put,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    request_body = DescriptionUpdateRequest,
    responses(
        (status = 200, description = "Role updated", body = Role),
        (status = 403, description = "System roles are immutable"),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<Uuid>,
    Json(req): Json<DescriptionUpdateRequest>,
) -> Result<Json<Role>, AppError> {
    authorize(&state, &auth, resources::ROLE, actions::MANAGE).await?;
    let role = state.rbac.update_role_description(role_id, req.description.as_deref()).await?;
    Ok(Json(role))
}

/// Delete a role
#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 403, description = "System roles cannot be deleted"),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    authorize(&state, &auth, resources::ROLE, actions::MANAGE).await?;
    state.rbac.delete_role(role_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Assign a permission to a role
#[utoipa::path(
    post,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    request_body = AssignPermissionToRoleRequest,
    responses(
        (status = 201, description = "Permission assigned"),
        (status = 404, description = "Role or permission not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_permission_to_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<Uuid>,
    Json(req): Json<AssignPermissionToRoleRequest>,
) -> Result<StatusCode, AppError> {
    authorize(&state, &auth, resources::ROLE, actions::MANAGE).await?;
    state.rbac.add_permission_to_role(role_id, req.permission_id).await?;
    Ok(StatusCode::CREATED)
}

/// Remove a permission from a role
#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}/permissions/{permission_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
        ("permission_id" = Uuid, Path, description = "Permission ID"),
    ),
    responses(
        (status = 204, description = "Permission removed"),
        (status = 404, description = "Role or permission not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn remove_permission_from_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((role_id, permission_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    authorize(&state, &auth, resources::ROLE, actions::MANAGE).await?;
    state.rbac.remove_permission_from_role(role_id, permission_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Make a role inherit from another role
#[utoipa::path(
    post,
    path = "/rbac/roles/{role_id}/children",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Inheriting role ID"),
    ),
    request_body = AddChildRoleRequest,
    responses(
        (status = 201, description = "Inheritance added"),
        (status = 404, description = "Role not found"),
        (status = 409, description = "Edge would create circular inheritance"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn add_child_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<Uuid>,
    Json(req): Json<AddChildRoleRequest>,
) -> Result<StatusCode, AppError> {
    authorize(&state, &auth, resources::ROLE, actions::MANAGE).await?;
    state.rbac.add_child_role(role_id, req.child_role_id).await?;
    Ok(StatusCode::CREATED)
}

/// Stop a role inheriting from another role
#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}/children/{child_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Inheriting role ID"),
        ("child_id" = Uuid, Path, description = "Inherited role ID"),
    ),
    responses(
        (status = 204, description = "Inheritance removed"),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn remove_child_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((role_id, child_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    authorize(&state, &auth, resources::ROLE, actions::MANAGE).await?;
    state.rbac.remove_child_role(role_id, child_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Effective permissions of a role, inheritance resolved
#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}/effective-permissions",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 200, description = "Effective permissions", body = Vec<Permission>),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role_effective_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<Uuid>,
) -> Result<Json<Vec<Permission>>, AppError> {
    authorize(&state, &auth, resources::ROLE, actions::VIEW).await?;
    let mut permissions: Vec<Permission> = state.rbac.role_effective_permissions(role_id).await?.into_iter().collect();
    permissions.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(permissions))
}

// =============================================================================
// PERMISSION ENDPOINTS
// =============================================================================

/// List all permissions
#[utoipa::path(
    get,
    path = "/rbac/permissions",
    tag = "RBAC",
    responses(
        (status = 200, description = "List of permissions", body = Vec<Permission>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Permission>>, AppError> {
    authorize(&state, &auth, resources::PERMISSION, actions::VIEW).await?;
    Ok(Json(state.rbac.list_permissions().await?))
}

/// Create a permission
#[utoipa::path(
    post,
    path = "/rbac/permissions",
    tag = "RBAC",
    request_body = PermissionCreateRequest,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 409, description = "Permission name already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<PermissionCreateRequest>,
) -> Result<(StatusCode, Json<Permission>), AppError> {
    authorize(&state, &auth, resources::PERMISSION, actions::MANAGE).await?;
    let permission = state.rbac.create_permission(req).await?;
    Ok((StatusCode::CREATED, Json(permission)))
}

/// Update a permission's description
#[utoipa::path(
    put,
    path = "/rbac/permissions/{permission_id}",
    tag = "RBAC",
    params(
        ("permission_id" = Uuid, Path, description = "Permission ID"),
    ),
    request_body = DescriptionUpdateRequest,
    responses(
        (status = 200, description = "Permission updated", body = Permission),
        (status = 404, description = "Permission not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(permission_id): Path<Uuid>,
    Json(req): Json<DescriptionUpdateRequest>,
) -> Result<Json<Permission>, AppError> {
    authorize(&state, &auth, resources::PERMISSION, actions::MANAGE).await?;
    let permission = state
        .rbac
        .update_permission_description(permission_id, req.description.as_deref())
        .await?;
    Ok(Json(permission))
}

/// Delete a permission no role holds
#[utoipa::path(
    delete,
    path = "/rbac/permissions/{permission_id}",
    tag = "RBAC",
    params(
        ("permission_id" = Uuid, Path, description = "Permission ID"),
    ),
    responses(
        (status = 204, description = "Permission deleted"),
        (status = 404, description = "Permission not found"),
        (status = 409, description = "Permission still assigned to a role"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(permission_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    authorize(&state, &auth, resources::PERMISSION, actions::MANAGE).await?;
    state.rbac.delete_permission(permission_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// USER ENDPOINTS
// =============================================================================

/// List users
#[utoipa::path(
    get,
    path = "/rbac/users",
    tag = "RBAC",
    responses(
        (status = 200, description = "List of users", body = Vec<User>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_users(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Vec<User>>, AppError> {
    authorize(&state, &auth, resources::USER, actions::VIEW).await?;
    Ok(Json(state.rbac.list_users().await?))
}

/// Register a user identity for role assignment
#[utoipa::path(
    post,
    path = "/rbac/users",
    tag = "RBAC",
    request_body = UserCreateRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 409, description = "Username already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<UserCreateRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    authorize(&state, &auth, resources::USER, actions::MANAGE).await?;
    let user = state.rbac.create_user(&req.username, req.email.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Get roles assigned to a user
#[utoipa::path(
    get,
    path = "/rbac/users/{username}/roles",
    tag = "RBAC",
    params(
        ("username" = String, Path, description = "Username"),
    ),
    responses(
        (status = 200, description = "User roles", body = Vec<Role>),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_user_roles(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(username): Path<String>,
) -> Result<Json<Vec<Role>>, AppError> {
    authorize(&state, &auth, resources::USER, actions::VIEW).await?;
    Ok(Json(state.rbac.user_roles(&username).await?))
}

/// Assign a role to a user
#[utoipa::path(
    post,
    path = "/rbac/users/{username}/roles",
    tag = "RBAC",
    params(
        ("username" = String, Path, description = "Username"),
    ),
    request_body = AssignRoleRequest,
    responses(
        (status = 201, description = "Role assigned"),
        (status = 404, description = "User or role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_role_to_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(username): Path<String>,
    Json(req): Json<AssignRoleRequest>,
) -> Result<StatusCode, AppError> {
    authorize(&state, &auth, resources::USER, actions::MANAGE).await?;
    state.rbac.assign_role_to_user(&username, &req.role).await?;
    Ok(StatusCode::CREATED)
}

/// Revoke a role from a user
#[utoipa::path(
    delete,
    path = "/rbac/users/{username}/roles/{role_name}",
    tag = "RBAC",
    params(
        ("username" = String, Path, description = "Username"),
        ("role_name" = String, Path, description = "Role name"),
    ),
    responses(
        (status = 204, description = "Role revoked"),
        (status = 404, description = "User or role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn revoke_role_from_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((username, role_name)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    authorize(&state, &auth, resources::USER, actions::MANAGE).await?;
    state.rbac.remove_role_from_user(&username, &role_name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Get effective permissions for a user (roles resolved through inheritance)
#[utoipa::path(
    get,
    path = "/rbac/users/{username}/effective-permissions",
    tag = "RBAC",
    params(
        ("username" = String, Path, description = "Username"),
    ),
    responses(
        (status = 200, description = "Effective permissions", body = EffectivePermissionsResponse),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_effective_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(username): Path<String>,
) -> Result<Json<EffectivePermissionsResponse>, AppError> {
    authorize(&state, &auth, resources::USER, actions::VIEW).await?;
    let effective = state.access.cache().get(&username).await?;
    Ok(Json(EffectivePermissionsResponse::from(effective.as_ref())))
}

// =============================================================================
// DECISIONS
// =============================================================================

/// Evaluate an access decision for any user. The decision is audited like any other.
#[utoipa::path(
    post,
    path = "/rbac/check",
    tag = "RBAC",
    request_body = CheckRequest,
    responses(
        (status = 200, description = "Decision", body = CheckResponse),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn check(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, AppError> {
    authorize(&state, &auth, resources::PERMISSION, actions::CHECK).await?;
    let context = auth.context.clone().with_details(format!("checked by {}", auth.username));
    let granted = state
        .access
        .check_with_context(&req.username, &req.resource, &req.action, req.resource_id.as_deref(), Some(context))
        .await?;
    Ok(Json(CheckResponse { granted }))
}

/// Permission cache counters
#[utoipa::path(
    get,
    path = "/rbac/cache/stats",
    tag = "RBAC",
    responses(
        (status = 200, description = "Cache counters", body = CacheStats),
    ),
    security(("bearerAuth" = []))
)]
pub async fn cache_stats(State(state): State<AppState>, auth: AuthUser) -> Result<Json<CacheStats>, AppError> {
    authorize(&state, &auth, resources::ROLE, actions::VIEW).await?;
    Ok(Json(state.access.cache().stats()))
}
