use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::tempdir;

use notes_rbac::audit::{AuditSink, AuditStore, RequestContext};
use notes_rbac::authz::{AccessDecisionPoint, PermissionCache, PermissionResolver, RbacService};
use notes_rbac::errors::{AppError, AppResult};
use notes_rbac::models::audit::AuditEntry;
use notes_rbac::models::rbac::{PermissionCreateRequest, RoleCreateRequest};

/// Audit store that is always down but remembers what it was handed.
#[derive(Default)]
struct OfflineStore {
    attempts: AtomicUsize,
    seen: Mutex<Vec<(String, bool)>>,
}

#[async_trait]
impl AuditStore for OfflineStore {
    async fn append(&self, entry: AuditEntry) -> AppResult<i64> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push((entry.permission(), entry.granted));
        Err(AppError::internal("audit database unavailable"))
    }
}

async fn setup_pool() -> Result<(tempfile::TempDir, SqlitePool)> {
    let dir = tempdir()?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("test.db"))
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;
    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;
    Ok((dir, pool))
}

#[tokio::test]
async fn failing_audit_store_never_changes_decisions() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;

    let store = Arc::new(OfflineStore::default());
    let (sink, writer) = AuditSink::spawn(store.clone());
    let cache = Arc::new(PermissionCache::new(PermissionResolver::new(pool.clone())));
    let rbac = RbacService::new(pool, Arc::clone(&cache));
    let access = AccessDecisionPoint::new(cache, sink);

    rbac.create_permission(PermissionCreateRequest::new("NOTES", "READ")).await?;
    rbac.create_composite_role(RoleCreateRequest {
        name: "VIEWER".into(),
        permissions: vec!["NOTES:READ".into()],
        ..Default::default()
    })
    .await?;
    rbac.create_user("carol", None).await?;
    rbac.assign_role_to_user("carol", "VIEWER").await?;

    let context = RequestContext::new().with_ip("10.1.2.3").with_user_agent("integration-test");
    let granted = access
        .check_with_context("carol", "NOTES", "READ", None, Some(context))
        .await?;
    let denied = access.check("carol", "NOTES", "DELETE", None).await?;
    assert!(granted);
    assert!(!denied);

    // dropping the last sink lets the writer drain the queue and stop
    drop(access);
    writer.await?;

    assert_eq!(store.attempts.load(Ordering::SeqCst), 2, "exactly one attempt per decision, no retries");
    let seen = store.seen.lock().clone();
    assert!(seen.contains(&("NOTES:READ".to_string(), true)));
    assert!(seen.contains(&("NOTES:DELETE".to_string(), false)));
    Ok(())
}

#[tokio::test]
async fn record_after_writer_stopped_does_not_panic() -> Result<()> {
    let store = Arc::new(OfflineStore::default());
    let (sink, writer) = AuditSink::spawn(store.clone());
    writer.abort();
    let _ = writer.await;

    sink.record(AuditEntry::new("dave", "NOTES", "READ", false));
    assert_eq!(store.attempts.load(Ordering::SeqCst), 0);
    Ok(())
}
