use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use uuid::Uuid;

use notes_rbac::audit::AuditStore;
use notes_rbac::db::audit::SqliteAuditLog;
use notes_rbac::errors::AppError;
use notes_rbac::models::audit::AuditEntry;

async fn setup() -> Result<(TempDir, SqliteAuditLog)> {
    let dir = tempdir()?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("audit.db"))
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;
    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;
    Ok((dir, SqliteAuditLog::new(pool)))
}

#[tokio::test]
async fn queries_filter_and_order_newest_first() -> Result<()> {
    let (_dir, log) = setup().await?;
    let alice = Uuid::new_v4();
    let base = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();

    let entries = [
        AuditEntry::new("alice", "NOTES", "READ", true).with_timestamp(base),
        AuditEntry::new("alice", "NOTES", "DELETE", false).with_timestamp(base + Duration::minutes(1)),
        AuditEntry::new("alice", "NOTES", "READ", true).with_timestamp(base + Duration::minutes(2)),
        AuditEntry::new("carol", "NOTES", "READ", false).with_timestamp(base + Duration::minutes(3)),
    ];
    for (i, entry) in entries.into_iter().enumerate() {
        let user_id = if i < 3 { Some(alice) } else { None };
        log.append(entry.with_user_id(user_id)).await?;
    }

    assert_eq!(log.count().await?, 4);

    let by_id = log.by_user_id(alice).await?;
    assert_eq!(by_id.len(), 3);
    assert!(by_id.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    assert_eq!(by_id[0].timestamp, base + Duration::minutes(2));

    let recent = log.recent_by_user_id(alice, base + Duration::minutes(1)).await?;
    assert_eq!(recent.len(), 2);
    assert!(recent.iter().all(|r| r.timestamp >= base + Duration::minutes(1)));

    let reads = log.by_resource_action("NOTES", "READ").await?;
    assert_eq!(reads.len(), 3);
    assert!(reads.iter().all(|r| r.permission == "NOTES:READ"));
    assert_eq!(reads[0].username, "carol");

    let denied = log.denied().await?;
    assert_eq!(denied.len(), 2);
    assert_eq!(denied[0].username, "carol");
    assert_eq!(denied[1].action, "DELETE");

    // window bounds land exactly on the first and third records
    let window = log.between(base, base + Duration::minutes(2)).await?;
    assert_eq!(window.len(), 3);
    assert_eq!(window.last().map(|r| r.timestamp), Some(base));

    assert_eq!(log.count_failed_since(alice, base).await?, 1);
    assert_eq!(log.count_failed_since(alice, base + Duration::minutes(2)).await?, 0);

    Ok(())
}

#[tokio::test]
async fn unstamped_entries_get_write_time() -> Result<()> {
    let (_dir, log) = setup().await?;
    let user_id = Uuid::new_v4();
    let before = Utc::now();

    let id = log
        .append(
            AuditEntry::new("dave", "REPORTS", "EXPORT", false)
                .with_user_id(Some(user_id))
                .with_resource_id(Some("q3".into())),
        )
        .await?;
    assert!(id > 0);

    let rows = log.by_username("dave").await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, id);
    assert_eq!(rows[0].resource_id.as_deref(), Some("q3"));
    assert!(rows[0].timestamp >= before - Duration::seconds(1));

    assert_eq!(log.count_recent_failures(user_id, 1).await?, 1);

    Ok(())
}

#[tokio::test]
async fn failure_window_past_the_clock_range_is_rejected() -> Result<()> {
    let (_dir, log) = setup().await?;
    let user_id = Uuid::new_v4();

    for hours in [i64::MAX, 3_000_000_000] {
        let err = log.count_recent_failures(user_id, hours).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)), "hours={} gave {:?}", hours, err);
    }
    assert_eq!(log.count_recent_failures(user_id, 10_000_000).await?, 0);

    Ok(())
}
