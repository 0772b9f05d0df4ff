//! Effective-permission resolution over the role inheritance graph.
//!
//! Every traversal carries its own visited set and never enters a role twice,
//! so diamonds are walked once and a cycle in the stored graph terminates.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::cache::PermissionSource;
use crate::db::versions::{self, StoreStamp};
use crate::db::{permissions, roles, users};
use crate::errors::{AppError, AppResult};
use crate::models::rbac::{EffectivePermissions, Permission};

/// Union of the direct permissions of every role reachable from `roots`
/// (the roots included).
pub async fn collect_permissions(conn: &mut SqliteConnection, roots: &[Uuid]) -> AppResult<HashSet<Permission>> {
    let mut visited: HashSet<Uuid> = HashSet::new();
    let mut stack: Vec<Uuid> = roots.to_vec();
    let mut collected: HashSet<Permission> = HashSet::new();

    while let Some(role_id) = stack.pop() {
        if !visited.insert(role_id) {
            continue;
        }

        collected.extend(permissions::list_for_role(&mut *conn, role_id).await?);

        for child in roles::child_ids(&mut *conn, role_id).await? {
            if !visited.contains(&child) {
                stack.push(child);
            }
        }
    }

    Ok(collected)
}

/// Whether `target` can be reached from `from` by following inheritance
/// edges. A role reaches itself.
pub async fn reaches(conn: &mut SqliteConnection, from: Uuid, target: Uuid) -> AppResult<bool> {
    let mut visited: HashSet<Uuid> = HashSet::new();
    let mut stack = vec![from];

    while let Some(role_id) = stack.pop() {
        if role_id == target {
            return Ok(true);
        }
        if !visited.insert(role_id) {
            continue;
        }
        for child in roles::child_ids(&mut *conn, role_id).await? {
            if !visited.contains(&child) {
                stack.push(child);
            }
        }
    }

    Ok(false)
}

/// Read-only resolver. Holds no state beyond its pool; caching is layered on
/// top by [`super::cache::PermissionCache`].
#[derive(Debug, Clone)]
pub struct PermissionResolver {
    pool: SqlitePool,
}

impl PermissionResolver {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn role_permissions(&self, role_id: Uuid) -> AppResult<HashSet<Permission>> {
        let mut conn = self.pool.acquire().await?;
        collect_permissions(&mut conn, &[role_id]).await
    }

    pub async fn role_permissions_by_name(&self, name: &str) -> AppResult<HashSet<Permission>> {
        let mut conn = self.pool.acquire().await?;
        let role = roles::get_by_name(&mut conn, name).await?;
        collect_permissions(&mut conn, &[role.id]).await
    }

    /// Fails with `UserNotFound` when the username is unknown.
    pub async fn user_permissions(&self, username: &str) -> AppResult<EffectivePermissions> {
        let mut conn = self.pool.acquire().await?;
        resolve_user(&mut conn, username).await
    }

    /// Resolves `username` and reads the change counters in one read
    /// transaction, so the stamp describes exactly the rows that were read.
    pub async fn user_permissions_stamped(&self, username: &str) -> AppResult<(EffectivePermissions, StoreStamp)> {
        let mut tx = self.pool.begin().await?;
        let stamp = versions::stamp_for(&mut tx, username)
            .await?
            .ok_or_else(|| AppError::user_not_found(username))?;
        let effective = resolve_user(&mut tx, username).await?;
        tx.commit().await?;

        Ok((effective, stamp))
    }
}

#[async_trait]
impl PermissionSource for PermissionResolver {
    async fn stamp(&self, username: &str) -> AppResult<Option<StoreStamp>> {
        let mut conn = self.pool.acquire().await?;
        versions::stamp_for(&mut conn, username).await
    }

    async fn resolve(&self, username: &str) -> AppResult<(EffectivePermissions, StoreStamp)> {
        self.user_permissions_stamped(username).await
    }
}

async fn resolve_user(conn: &mut SqliteConnection, username: &str) -> AppResult<EffectivePermissions> {
    tracing::debug!(username = %username, "Loading permissions for user");

    let user = users::get_by_username(&mut *conn, username).await?;
    let user_roles = users::roles_of(&mut *conn, user.id).await?;

    let role_ids: Vec<Uuid> = user_roles.iter().map(|r| r.id).collect();
    let permissions = collect_permissions(&mut *conn, &role_ids).await?;

    tracing::debug!(username = %username, count = permissions.len(), "resolved user permissions");

    Ok(EffectivePermissions {
        user_id: user.id,
        username: user.username,
        roles: user_roles.into_iter().map(|r| r.name).collect(),
        permissions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rbac::PermissionCreateRequest;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect");
        sqlx::migrate!().run(&pool).await.expect("migrate");
        pool
    }

    async fn role_with(conn: &mut SqliteConnection, name: &str, perms: &[(&str, &str)]) -> Uuid {
        let role = roles::insert(conn, name, None, false).await.unwrap();
        for (resource, action) in perms {
            let p = permissions::insert(conn, &PermissionCreateRequest::new(*resource, *action)).await.unwrap();
            roles::add_permission(conn, role.id, p.id).await.unwrap();
        }
        role.id
    }

    fn names(set: &HashSet<Permission>) -> Vec<String> {
        let mut v: Vec<String> = set.iter().map(|p| p.name.clone()).collect();
        v.sort();
        v
    }

    #[tokio::test]
    async fn leaf_role_resolves_to_direct_permissions() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let viewer = role_with(&mut conn, "VIEWER", &[("NOTES", "READ")]).await;

        let perms = collect_permissions(&mut conn, &[viewer]).await.unwrap();
        assert_eq!(names(&perms), vec!["NOTES:READ"]);
    }

    #[tokio::test]
    async fn empty_role_resolves_to_empty_set() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let empty = role_with(&mut conn, "EMPTY", &[]).await;

        assert!(collect_permissions(&mut conn, &[empty]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn diamond_inheritance_counts_shared_permission_once() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let d = role_with(&mut conn, "D", &[("NOTES", "READ")]).await;
        let b = role_with(&mut conn, "B", &[("NOTES", "MODIFY")]).await;
        let c = role_with(&mut conn, "C", &[("NOTES", "SHARE")]).await;
        let a = role_with(&mut conn, "A", &[]).await;
        roles::add_child(&mut conn, a, b).await.unwrap();
        roles::add_child(&mut conn, a, c).await.unwrap();
        roles::add_child(&mut conn, b, d).await.unwrap();
        roles::add_child(&mut conn, c, d).await.unwrap();

        let perms = collect_permissions(&mut conn, &[a]).await.unwrap();
        assert_eq!(names(&perms), vec!["NOTES:MODIFY", "NOTES:READ", "NOTES:SHARE"]);
    }

    #[tokio::test]
    async fn stored_cycle_terminates() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let a = role_with(&mut conn, "A", &[("NOTES", "READ")]).await;
        let b = role_with(&mut conn, "B", &[("NOTES", "MODIFY")]).await;
        // written straight through the store, bypassing the cycle check
        roles::add_child(&mut conn, a, b).await.unwrap();
        roles::add_child(&mut conn, b, a).await.unwrap();

        let from_a = collect_permissions(&mut conn, &[a]).await.unwrap();
        let from_b = collect_permissions(&mut conn, &[b]).await.unwrap();
        assert_eq!(names(&from_a), vec!["NOTES:MODIFY", "NOTES:READ"]);
        assert_eq!(names(&from_a), names(&from_b));
        assert!(reaches(&mut conn, a, a).await.unwrap());
    }

    #[tokio::test]
    async fn reaches_follows_edges_in_one_direction() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let a = role_with(&mut conn, "A", &[]).await;
        let b = role_with(&mut conn, "B", &[]).await;
        let c = role_with(&mut conn, "C", &[]).await;
        roles::add_child(&mut conn, a, b).await.unwrap();
        roles::add_child(&mut conn, b, c).await.unwrap();

        assert!(reaches(&mut conn, a, c).await.unwrap());
        assert!(!reaches(&mut conn, c, a).await.unwrap());
    }

    #[tokio::test]
    async fn role_lookup_by_name_includes_inherited() {
        let pool = setup_pool().await;
        {
            let mut conn = pool.acquire().await.unwrap();
            let viewer = role_with(&mut conn, "VIEWER", &[("NOTES", "READ")]).await;
            let editor = role_with(&mut conn, "EDITOR", &[("NOTES", "MODIFY")]).await;
            roles::add_child(&mut conn, editor, viewer).await.unwrap();
        }
        let resolver = PermissionResolver::new(pool);

        let perms = resolver.role_permissions_by_name("EDITOR").await.unwrap();
        assert_eq!(names(&perms), vec!["NOTES:MODIFY", "NOTES:READ"]);

        let err = resolver.role_permissions_by_name("AUDITOR").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
