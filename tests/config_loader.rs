use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::tempdir;

use notes_rbac::authz::{PermissionCache, PermissionResolver, RbacService};
use notes_rbac::config_loader::{apply_permissions, apply_roles, PermissionDefinition, RoleDefinition};

async fn service() -> Result<(tempfile::TempDir, RbacService)> {
    let dir = tempdir()?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("test.db"))
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;
    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    let cache = Arc::new(PermissionCache::new(PermissionResolver::new(pool.clone())));
    Ok((dir, RbacService::new(pool, cache)))
}

fn permission_batch() -> Result<Vec<PermissionDefinition>> {
    Ok(serde_json::from_value(json!([
        { "name": "NOTES:READ", "resource": "NOTES", "action": "READ", "description": "Read notes" },
        { "name": "NOTES:MODIFY", "resource": "NOTES", "action": "MODIFY" },
        { "name": "*:*", "resource": "*", "action": "*" }
    ]))?)
}

#[tokio::test]
async fn permission_batch_is_idempotent() -> Result<()> {
    let (_dir, svc) = service().await?;
    let batch = permission_batch()?;

    let first = apply_permissions(&svc, &batch).await?;
    assert_eq!(first.created, vec!["NOTES:READ", "NOTES:MODIFY", "*:*"]);
    assert!(first.skipped.is_empty());

    let second = apply_permissions(&svc, &batch).await?;
    assert!(second.created.is_empty());
    assert_eq!(second.skipped.len(), 3);
    assert_eq!(svc.list_permissions().await?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn existing_role_is_skipped_not_overwritten() -> Result<()> {
    let (_dir, svc) = service().await?;
    apply_permissions(&svc, &permission_batch()?).await?;
    svc.create_role("VIEWER", Some("hand made"), false).await?;

    let report = apply_roles(
        &svc,
        &[RoleDefinition {
            name: "VIEWER".into(),
            description: Some("from config".into()),
            permissions: vec!["NOTES:READ".into()],
            ..Default::default()
        }],
    )
    .await?;

    assert_eq!(report.skipped, vec!["VIEWER"]);
    let viewer = svc.find_role_by_name("VIEWER").await?.expect("VIEWER exists");
    assert_eq!(viewer.description.as_deref(), Some("hand made"));
    assert!(svc.role_detail(viewer.id).await?.permissions.is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_references_are_warnings_and_the_rest_applies() -> Result<()> {
    let (_dir, svc) = service().await?;
    apply_permissions(&svc, &permission_batch()?).await?;

    let roles: Vec<RoleDefinition> = serde_json::from_value(json!([
        { "name": "VIEWER", "permissions": ["NOTES:READ"] },
        {
            "name": "EDITOR",
            "inherits": ["VIEWER", "AUTHOR"],
            "permissions": ["NOTES:MODIFY"],
            "additional_permissions": ["NOTES:ARCHIVE"]
        },
        { "name": "ADMIN", "is_system": true, "permissions": ["*:*"] }
    ]))?;

    let report = apply_roles(&svc, &roles).await?;
    assert_eq!(report.created, vec!["VIEWER", "EDITOR", "ADMIN"]);
    assert_eq!(report.warnings.len(), 2);
    assert!(report.warnings.iter().any(|w| w.contains("NOTES:ARCHIVE")));
    assert!(report.warnings.iter().any(|w| w.contains("AUTHOR")));

    let editor = svc.find_role_by_name("EDITOR").await?.expect("EDITOR exists");
    let mut effective: Vec<String> = svc
        .role_effective_permissions(editor.id)
        .await?
        .into_iter()
        .map(|p| p.name)
        .collect();
    effective.sort();
    assert_eq!(effective, vec!["NOTES:MODIFY", "NOTES:READ"]);

    let admin = svc.find_role_by_name("ADMIN").await?.expect("ADMIN exists");
    assert!(admin.is_system);
    Ok(())
}
