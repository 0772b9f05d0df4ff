//! SQLite-backed audit log: the append side used by the audit writer and the
//! read-side queries used by operators.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::audit::AuditStore;
use crate::db::row_parsers::audit_from_row;
use crate::errors::{AppError, AppResult};
use crate::models::audit::{AuditEntry, PermissionAudit};
use crate::utils::{db_timestamp, utc_now};

const COLUMNS: &str =
    "id, user_id, username, permission, resource, resource_id, action, granted, ip_address, user_agent, details, timestamp";
const NEWEST_FIRST: &str = "ORDER BY timestamp DESC, id DESC";

#[derive(Debug, Clone)]
pub struct SqliteAuditLog {
    pool: SqlitePool,
}

impl SqliteAuditLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn by_username(&self, username: &str) -> AppResult<Vec<PermissionAudit>> {
        let rows = sqlx::query(&format!("SELECT {} FROM permission_audit WHERE username = ? {}", COLUMNS, NEWEST_FIRST))
            .bind(username)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(audit_from_row).collect()
    }

    pub async fn by_user_id(&self, user_id: Uuid) -> AppResult<Vec<PermissionAudit>> {
        let rows = sqlx::query(&format!("SELECT {} FROM permission_audit WHERE user_id = ? {}", COLUMNS, NEWEST_FIRST))
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(audit_from_row).collect()
    }

    pub async fn by_resource_action(&self, resource: &str, action: &str) -> AppResult<Vec<PermissionAudit>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM permission_audit WHERE resource = ? AND action = ? {}",
            COLUMNS, NEWEST_FIRST
        ))
        .bind(resource)
        .bind(action)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(audit_from_row).collect()
    }

    pub async fn denied(&self) -> AppResult<Vec<PermissionAudit>> {
        let rows = sqlx::query(&format!("SELECT {} FROM permission_audit WHERE granted = 0 {}", COLUMNS, NEWEST_FIRST))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(audit_from_row).collect()
    }

    /// Inclusive on both ends.
    pub async fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<Vec<PermissionAudit>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM permission_audit WHERE timestamp BETWEEN ? AND ? {}",
            COLUMNS, NEWEST_FIRST
        ))
        .bind(db_timestamp(start))
        .bind(db_timestamp(end))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(audit_from_row).collect()
    }

    pub async fn recent_by_user_id(&self, user_id: Uuid, since: DateTime<Utc>) -> AppResult<Vec<PermissionAudit>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM permission_audit WHERE user_id = ? AND timestamp >= ? {}",
            COLUMNS, NEWEST_FIRST
        ))
        .bind(user_id.to_string())
        .bind(db_timestamp(since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(audit_from_row).collect()
    }

    pub async fn count_failed_since(&self, user_id: Uuid, since: DateTime<Utc>) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM permission_audit WHERE user_id = ? AND granted = 0 AND timestamp >= ?",
        )
        .bind(user_id.to_string())
        .bind(db_timestamp(since))
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Denied decisions for `user_id` within the last `hours` hours. A window
    /// reaching past the representable clock range is a `BadRequest`.
    pub async fn count_recent_failures(&self, user_id: Uuid, hours: i64) -> AppResult<i64> {
        let since = Duration::try_hours(hours)
            .and_then(|window| utc_now().checked_sub_signed(window))
            .ok_or_else(|| AppError::bad_request(format!("hours out of range: {}", hours)))?;
        self.count_failed_since(user_id, since).await
    }

    pub async fn count(&self) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM permission_audit")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl AuditStore for SqliteAuditLog {
    async fn append(&self, entry: AuditEntry) -> AppResult<i64> {
        let permission = entry.permission();
        let timestamp = entry.timestamp.unwrap_or_else(utc_now);

        let result = sqlx::query(
            r#"
            INSERT INTO permission_audit
                (user_id, username, permission, resource, resource_id, action, granted, ip_address, user_agent, details, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.user_id.map(|u| u.to_string()))
        .bind(&entry.username)
        .bind(&permission)
        .bind(&entry.resource)
        .bind(&entry.resource_id)
        .bind(&entry.action)
        .bind(entry.granted)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(&entry.details)
        .bind(db_timestamp(timestamp))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }
}
