//! Mutation API over the role graph and user-role assignments.
//!
//! Structural changes (roles, role permissions, role edges) run under one
//! in-process lock and one transaction whose first statement bumps the
//! persisted graph counter. That write holds SQLite's write lock until
//! commit, so a cycle check and the edge write it guards cannot interleave
//! with another mutation, from this process or another one on the same
//! database. Cache invalidation happens after commit and before the call
//! returns.

use std::collections::HashSet;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::cache::{Invalidation, PermissionCache};
use super::resolver::{self, PermissionResolver};
use crate::db::{permissions, roles, users, versions, Partial};
use crate::errors::{AppError, AppResult};
use crate::models::rbac::{Permission, PermissionCreateRequest, Role, RoleCreateRequest, RoleDetail};
use crate::models::user::User;

pub struct RbacService {
    pool: SqlitePool,
    cache: Arc<PermissionCache>,
    graph_lock: Mutex<()>,
}

impl RbacService {
    pub fn new(pool: SqlitePool, cache: Arc<PermissionCache>) -> Self {
        Self {
            pool,
            cache,
            graph_lock: Mutex::new(()),
        }
    }

    pub fn cache(&self) -> &Arc<PermissionCache> {
        &self.cache
    }

    // =========================================================================
    // PERMISSIONS
    // =========================================================================

    pub async fn create_permission(&self, req: PermissionCreateRequest) -> AppResult<Permission> {
        if req.resource.trim().is_empty() || req.action.trim().is_empty() {
            return Err(AppError::bad_request("resource and action are required"));
        }

        let _graph = self.graph_lock.lock().await;
        let mut conn = self.pool.acquire().await?;
        let permission = permissions::insert(&mut conn, &req).await?;

        tracing::info!(permission = %permission.name, "Created permission");
        Ok(permission)
    }

    pub async fn update_permission_description(&self, id: Uuid, description: Option<&str>) -> AppResult<Permission> {
        let mut conn = self.pool.acquire().await?;
        permissions::update_description(&mut conn, id, description).await
    }

    /// Refuses with `PermissionInUse` while any role still holds the permission.
    pub async fn delete_permission(&self, id: Uuid) -> AppResult<()> {
        let _graph = self.graph_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let permission = permissions::get_by_id(&mut tx, id).await?;
        let assignments = permissions::count_role_assignments(&mut tx, id).await?;
        if assignments > 0 {
            return Err(AppError::permission_in_use(format!("{} ({} roles)", permission.name, assignments)));
        }
        permissions::delete(&mut tx, id).await?;
        tx.commit().await?;

        tracing::info!(permission = %permission.name, "Deleted permission");
        Ok(())
    }

    pub async fn list_permissions(&self) -> AppResult<Vec<Permission>> {
        let mut conn = self.pool.acquire().await?;
        permissions::list(&mut conn).await
    }

    pub async fn find_permission_by_name(&self, name: &str) -> AppResult<Option<Permission>> {
        let mut conn = self.pool.acquire().await?;
        permissions::find_by_name(&mut conn, name).await
    }

    pub async fn find_permissions(&self, names: &[String]) -> AppResult<Partial<Permission>> {
        let mut conn = self.pool.acquire().await?;
        permissions::find_by_names(&mut conn, names).await
    }

    // =========================================================================
    // ROLES
    // =========================================================================

    pub async fn create_role(&self, name: &str, description: Option<&str>, is_system: bool) -> AppResult<Role> {
        self.create_composite_role(RoleCreateRequest {
            name: name.to_string(),
            description: description.map(str::to_string),
            is_system,
            ..Default::default()
        })
        .await
    }

    /// Creates a role that inherits `req.inherits` and directly holds
    /// `req.permissions`. Every referenced name must exist.
    pub async fn create_composite_role(&self, req: RoleCreateRequest) -> AppResult<Role> {
        if req.name.trim().is_empty() {
            return Err(AppError::bad_request("role name is required"));
        }
        tracing::info!(role = %req.name, "Creating composite role");

        let _graph = self.graph_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        versions::bump_graph(&mut tx).await?;

        if roles::exists_by_name(&mut tx, &req.name).await? {
            return Err(AppError::already_exists(format!("role {}", req.name)));
        }

        let inherited = roles::find_by_names(&mut tx, &req.inherits).await?.into_complete("inherited roles")?;
        let direct = permissions::find_by_names(&mut tx, &req.permissions).await?.into_complete("permissions")?;

        let role = roles::insert(&mut tx, &req.name, req.description.as_deref(), req.is_system).await?;
        for permission in &direct {
            roles::add_permission(&mut tx, role.id, permission.id).await?;
        }
        // a brand-new role has no parents, so none of these edges can close a cycle
        for child in &inherited {
            roles::add_child(&mut tx, role.id, child.id).await?;
        }
        tx.commit().await?;
        self.cache.apply(Invalidation::Global);

        tracing::info!(
            role = %role.name,
            direct_permissions = direct.len(),
            inherited_roles = inherited.len(),
            "Created composite role"
        );
        Ok(role)
    }

    pub async fn update_role_description(&self, id: Uuid, description: Option<&str>) -> AppResult<Role> {
        let mut conn = self.pool.acquire().await?;
        let role = roles::get_by_id(&mut conn, id).await?;
        if role.is_system {
            return Err(AppError::system_role(role.name));
        }
        roles::update_description(&mut conn, id, description).await
    }

    pub async fn delete_role(&self, id: Uuid) -> AppResult<()> {
        let _graph = self.graph_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        versions::bump_graph(&mut tx).await?;

        let role = roles::get_by_id(&mut tx, id).await?;
        if role.is_system {
            return Err(AppError::system_role(role.name));
        }
        roles::delete(&mut tx, id).await?;
        tx.commit().await?;
        self.cache.apply(Invalidation::Global);

        tracing::info!(role = %role.name, "Deleted role");
        Ok(())
    }

    pub async fn add_permission_to_role(&self, role_id: Uuid, permission_id: Uuid) -> AppResult<()> {
        let _graph = self.graph_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        versions::bump_graph(&mut tx).await?;

        let role = mutable_role(&mut tx, role_id).await?;
        let permission = permissions::get_by_id(&mut tx, permission_id).await?;
        roles::add_permission(&mut tx, role.id, permission.id).await?;
        tx.commit().await?;
        self.cache.apply(Invalidation::Global);

        tracing::info!(role = %role.name, permission = %permission.name, "Added permission to role");
        Ok(())
    }

    pub async fn remove_permission_from_role(&self, role_id: Uuid, permission_id: Uuid) -> AppResult<()> {
        let _graph = self.graph_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        versions::bump_graph(&mut tx).await?;

        let role = mutable_role(&mut tx, role_id).await?;
        let permission = permissions::get_by_id(&mut tx, permission_id).await?;
        roles::remove_permission(&mut tx, role.id, permission.id).await?;
        tx.commit().await?;
        self.cache.apply(Invalidation::Global);

        tracing::info!(role = %role.name, permission = %permission.name, "Removed permission from role");
        Ok(())
    }

    /// Makes `parent_id` inherit from `child_id`. Rejected with
    /// `CircularDependency` when the two are the same role or when `parent_id`
    /// is already reachable from `child_id`.
    pub async fn add_child_role(&self, parent_id: Uuid, child_id: Uuid) -> AppResult<()> {
        let _graph = self.graph_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        versions::bump_graph(&mut tx).await?;

        let parent = mutable_role(&mut tx, parent_id).await?;
        let child = roles::get_by_id(&mut tx, child_id).await?;

        if parent.id == child.id || resolver::reaches(&mut tx, child.id, parent.id).await? {
            tracing::warn!(parent = %parent.name, child = %child.name, "Rejected circular role inheritance");
            return Err(AppError::circular_dependency(format!(
                "{} already inherits from {}",
                child.name, parent.name
            )));
        }

        roles::add_child(&mut tx, parent.id, child.id).await?;
        tx.commit().await?;
        self.cache.apply(Invalidation::Global);

        tracing::info!(parent = %parent.name, child = %child.name, "Added inherited role");
        Ok(())
    }

    pub async fn remove_child_role(&self, parent_id: Uuid, child_id: Uuid) -> AppResult<()> {
        let _graph = self.graph_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        versions::bump_graph(&mut tx).await?;

        let parent = mutable_role(&mut tx, parent_id).await?;
        let child = roles::get_by_id(&mut tx, child_id).await?;
        roles::remove_child(&mut tx, parent.id, child.id).await?;
        tx.commit().await?;
        self.cache.apply(Invalidation::Global);

        tracing::info!(parent = %parent.name, child = %child.name, "Removed inherited role");
        Ok(())
    }

    pub async fn list_roles(&self) -> AppResult<Vec<Role>> {
        let mut conn = self.pool.acquire().await?;
        roles::list(&mut conn).await
    }

    pub async fn list_system_roles(&self, is_system: bool) -> AppResult<Vec<Role>> {
        let mut conn = self.pool.acquire().await?;
        roles::list_by_system_flag(&mut conn, is_system).await
    }

    pub async fn find_role_by_name(&self, name: &str) -> AppResult<Option<Role>> {
        let mut conn = self.pool.acquire().await?;
        roles::find_by_name(&mut conn, name).await
    }

    pub async fn find_roles(&self, names: &[String]) -> AppResult<Partial<Role>> {
        let mut conn = self.pool.acquire().await?;
        roles::find_by_names(&mut conn, names).await
    }

    pub async fn role_detail(&self, id: Uuid) -> AppResult<RoleDetail> {
        let mut conn = self.pool.acquire().await?;
        let role = roles::get_by_id(&mut conn, id).await?;
        let permissions = permissions::list_for_role(&mut conn, id).await?;
        let child_roles = roles::child_roles(&mut conn, id).await?.into_iter().map(|r| r.name).collect();

        Ok(RoleDetail { role, permissions, child_roles })
    }

    /// Effective permissions of a role, inheritance resolved.
    pub async fn role_effective_permissions(&self, id: Uuid) -> AppResult<HashSet<Permission>> {
        {
            let mut conn = self.pool.acquire().await?;
            roles::get_by_id(&mut conn, id).await?;
        }
        PermissionResolver::new(self.pool.clone()).role_permissions(id).await
    }

    // =========================================================================
    // USERS
    // =========================================================================

    pub async fn create_user(&self, username: &str, email: Option<&str>) -> AppResult<User> {
        if username.trim().is_empty() {
            return Err(AppError::bad_request("username is required"));
        }
        let mut conn = self.pool.acquire().await?;
        if users::exists_by_username(&mut conn, username).await? {
            return Err(AppError::already_exists(format!("user {}", username)));
        }
        let user = users::insert(&mut conn, username, email).await?;
        self.cache.apply(Invalidation::PerUser(user.username.clone()));

        tracing::info!(username = %user.username, "Created user");
        Ok(user)
    }

    pub async fn find_user(&self, username: &str) -> AppResult<Option<User>> {
        let mut conn = self.pool.acquire().await?;
        users::find_by_username(&mut conn, username).await
    }

    pub async fn list_users(&self) -> AppResult<Vec<User>> {
        let mut conn = self.pool.acquire().await?;
        users::list(&mut conn).await
    }

    pub async fn user_roles(&self, username: &str) -> AppResult<Vec<Role>> {
        let mut conn = self.pool.acquire().await?;
        let user = users::get_by_username(&mut conn, username).await?;
        users::roles_of(&mut conn, user.id).await
    }

    pub async fn assign_role_to_user(&self, username: &str, role_name: &str) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        let user = users::get_by_username(&mut tx, username).await?;
        let role = roles::get_by_name(&mut tx, role_name).await?;
        versions::bump_user(&mut tx, user.id).await?;
        users::add_role(&mut tx, user.id, role.id).await?;
        tx.commit().await?;
        self.cache.apply(Invalidation::PerUser(user.username.clone()));

        tracing::info!(username = %username, role = %role_name, "Assigned role to user");
        Ok(())
    }

    pub async fn remove_role_from_user(&self, username: &str, role_name: &str) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        let user = users::get_by_username(&mut tx, username).await?;
        let role = roles::get_by_name(&mut tx, role_name).await?;
        versions::bump_user(&mut tx, user.id).await?;
        users::remove_role(&mut tx, user.id, role.id).await?;
        tx.commit().await?;
        self.cache.apply(Invalidation::PerUser(user.username.clone()));

        tracing::info!(username = %username, role = %role_name, "Removed role from user");
        Ok(())
    }
}

async fn mutable_role(conn: &mut sqlx::SqliteConnection, id: Uuid) -> AppResult<Role> {
    let role = roles::get_by_id(conn, id).await?;
    if role.is_system {
        return Err(AppError::system_role(role.name));
    }
    Ok(role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn service() -> RbacService {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect");
        sqlx::migrate!().run(&pool).await.expect("migrate");
        let cache = Arc::new(PermissionCache::new(PermissionResolver::new(pool.clone())));
        RbacService::new(pool, cache)
    }

    #[tokio::test]
    async fn self_inheritance_is_rejected() {
        let svc = service().await;
        let a = svc.create_role("A", None, false).await.unwrap();

        let err = svc.add_child_role(a.id, a.id).await.unwrap_err();
        assert!(matches!(err, AppError::CircularDependency(_)));
    }

    #[tokio::test]
    async fn reverse_edge_is_rejected() {
        let svc = service().await;
        let a = svc.create_role("A", None, false).await.unwrap();
        let b = svc.create_role("B", None, false).await.unwrap();

        svc.add_child_role(a.id, b.id).await.unwrap();
        let err = svc.add_child_role(b.id, a.id).await.unwrap_err();
        assert!(matches!(err, AppError::CircularDependency(_)));
    }

    #[tokio::test]
    async fn transitive_cycle_is_rejected_but_redundant_edge_is_allowed() {
        let svc = service().await;
        let a = svc.create_role("A", None, false).await.unwrap();
        let b = svc.create_role("B", None, false).await.unwrap();
        let c = svc.create_role("C", None, false).await.unwrap();
        svc.add_child_role(a.id, b.id).await.unwrap();
        svc.add_child_role(b.id, c.id).await.unwrap();

        let err = svc.add_child_role(c.id, a.id).await.unwrap_err();
        assert!(matches!(err, AppError::CircularDependency(_)));

        // A already reaches C through B; a direct edge adds no cycle
        svc.add_child_role(a.id, c.id).await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_role_name_is_already_exists() {
        let svc = service().await;
        svc.create_role("EDITOR", None, false).await.unwrap();

        let err = svc.create_role("EDITOR", None, false).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn composite_role_with_unknown_reference_fails_and_writes_nothing() {
        let svc = service().await;
        svc.create_permission(PermissionCreateRequest::new("NOTES", "READ")).await.unwrap();

        let err = svc
            .create_composite_role(RoleCreateRequest {
                name: "EDITOR".into(),
                permissions: vec!["NOTES:READ".into(), "NOTES:MISSING".into()],
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound(ref m) if m.contains("NOTES:MISSING")));
        assert!(svc.find_role_by_name("EDITOR").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn system_roles_are_immutable() {
        let svc = service().await;
        let admin = svc.create_role("ADMIN", None, true).await.unwrap();
        let p = svc.create_permission(PermissionCreateRequest::new("*", "*")).await.unwrap();

        assert!(matches!(svc.delete_role(admin.id).await, Err(AppError::SystemRole(_))));
        assert!(matches!(svc.add_permission_to_role(admin.id, p.id).await, Err(AppError::SystemRole(_))));
        assert!(matches!(
            svc.update_role_description(admin.id, Some("x")).await,
            Err(AppError::SystemRole(_))
        ));
    }

    #[tokio::test]
    async fn assigned_permission_cannot_be_deleted() {
        let svc = service().await;
        let role = svc.create_role("VIEWER", None, false).await.unwrap();
        let p = svc.create_permission(PermissionCreateRequest::new("NOTES", "READ")).await.unwrap();
        svc.add_permission_to_role(role.id, p.id).await.unwrap();

        assert!(matches!(svc.delete_permission(p.id).await, Err(AppError::PermissionInUse(_))));

        svc.remove_permission_from_role(role.id, p.id).await.unwrap();
        svc.delete_permission(p.id).await.unwrap();
        assert!(svc.list_permissions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn structural_mutation_clears_cache_and_assignment_clears_one_user() {
        let svc = service().await;
        let viewer = svc.create_role("VIEWER", None, false).await.unwrap();
        svc.create_user("alice", None).await.unwrap();
        svc.create_user("bob", None).await.unwrap();
        svc.assign_role_to_user("alice", "VIEWER").await.unwrap();
        svc.assign_role_to_user("bob", "VIEWER").await.unwrap();

        svc.cache().get("alice").await.unwrap();
        svc.cache().get("bob").await.unwrap();
        assert_eq!(svc.cache().stats().entries, 2);

        svc.remove_role_from_user("alice", "VIEWER").await.unwrap();
        assert_eq!(svc.cache().stats().entries, 1);

        let read = svc.create_permission(PermissionCreateRequest::new("NOTES", "READ")).await.unwrap();
        svc.add_permission_to_role(viewer.id, read.id).await.unwrap();
        assert_eq!(svc.cache().stats().entries, 0);

        let bob = svc.cache().get("bob").await.unwrap();
        assert!(bob.allows("NOTES", "READ"));
        let alice = svc.cache().get("alice").await.unwrap();
        assert!(!alice.allows("NOTES", "READ"));
    }
}
