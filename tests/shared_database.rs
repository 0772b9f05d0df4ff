use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::tempdir;

use notes_rbac::audit::{AuditSink, AuditStore};
use notes_rbac::authz::{AccessDecisionPoint, PermissionCache, PermissionResolver, RbacService};
use notes_rbac::db::audit::SqliteAuditLog;
use notes_rbac::errors::AppError;
use notes_rbac::models::rbac::{PermissionCreateRequest, RoleCreateRequest};

/// One process worth of engine: its own pool, cache and graph lock.
struct Process {
    rbac: RbacService,
    access: AccessDecisionPoint,
}

async fn open(db: &Path) -> Result<Process> {
    let opts = SqliteConnectOptions::new().filename(db).create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let store: Arc<dyn AuditStore> = Arc::new(SqliteAuditLog::new(pool.clone()));
    let (sink, _writer) = AuditSink::spawn(store);
    let cache = Arc::new(PermissionCache::new(PermissionResolver::new(pool.clone())));

    Ok(Process {
        rbac: RbacService::new(pool, Arc::clone(&cache)),
        access: AccessDecisionPoint::new(cache, sink),
    })
}

async fn migrated(db: &Path) -> Result<()> {
    let opts = SqliteConnectOptions::new().filename(db).create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;
    let migrator = sqlx::migrate::Migrator::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;
    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn changes_made_by_another_process_reach_the_server_cache() -> Result<()> {
    let dir = tempdir()?;
    let db = dir.path().join("shared.db");
    migrated(&db).await?;

    let server = open(&db).await?;
    let operator = open(&db).await?;

    server.rbac.create_permission(PermissionCreateRequest::new("NOTES", "DELETE")).await?;
    server.rbac.create_permission(PermissionCreateRequest::new("NOTES", "READ")).await?;
    server
        .rbac
        .create_composite_role(RoleCreateRequest {
            name: "EDITOR".into(),
            permissions: vec!["NOTES:DELETE".into(), "NOTES:READ".into()],
            ..Default::default()
        })
        .await?;
    server.rbac.create_user("bob", None).await?;
    server.rbac.assign_role_to_user("bob", "EDITOR").await?;

    assert!(server.access.check("bob", "NOTES", "DELETE", None).await?);
    assert!(server.access.check("bob", "NOTES", "DELETE", None).await?);
    assert_eq!(server.access.cache().stats().hits, 1);

    // graph change from the other process
    let editor = operator.rbac.find_role_by_name("EDITOR").await?.expect("editor");
    let delete = operator
        .rbac
        .find_permission_by_name("NOTES:DELETE")
        .await?
        .expect("permission");
    operator.rbac.remove_permission_from_role(editor.id, delete.id).await?;

    assert!(!server.access.check("bob", "NOTES", "DELETE", None).await?);
    assert!(server.access.check("bob", "NOTES", "READ", None).await?);

    // assignment change from the other process
    operator.rbac.remove_role_from_user("bob", "EDITOR").await?;

    assert!(!server.access.check("bob", "NOTES", "READ", None).await?);
    assert_eq!(server.access.cache().stats().stale, 2);

    Ok(())
}

#[tokio::test]
async fn opposite_edges_from_two_processes_never_both_commit() -> Result<()> {
    let dir = tempdir()?;
    let db = dir.path().join("shared.db");
    migrated(&db).await?;

    let server = open(&db).await?;
    let operator = open(&db).await?;

    let a = server.rbac.create_role("A", None, false).await?;
    let b = server.rbac.create_role("B", None, false).await?;

    let (left, right) = tokio::join!(
        server.rbac.add_child_role(a.id, b.id),
        operator.rbac.add_child_role(b.id, a.id),
    );

    let outcomes = [left, right];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(AppError::CircularDependency(_)))));

    let a_children = server.rbac.role_detail(a.id).await?.child_roles;
    let b_children = server.rbac.role_detail(b.id).await?.child_roles;
    assert_eq!(a_children.len() + b_children.len(), 1);

    Ok(())
}
