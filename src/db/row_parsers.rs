use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::audit::PermissionAudit;
use crate::models::rbac::{Permission, Role};
use crate::models::user::User;

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    let s = s.trim();

    // Try RFC3339 first (e.g. 2025-11-19T12:34:56Z)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Try SQLite default timestamp format: "YYYY-MM-DD HH:MM:SS" (with optional fractional seconds)
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    // Try date-only format: "YYYY-MM-DD"
    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date.and_hms_opt(0, 0, 0).ok_or_else(|| AppError::internal("invalid datetime: date out of range".to_string()))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(AppError::internal(format!("invalid datetime: {}", s)))
}

fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(s).map_err(|e| AppError::internal(format!("invalid uuid: {}", e)))
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, AppError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|e| AppError::internal(format!("missing {}: {}", name, e)))
}

pub fn permission_from_row(row: &SqliteRow) -> Result<Permission, AppError> {
    let id_s: String = column(row, "id")?;
    let name: String = column(row, "name")?;
    let resource: String = column(row, "resource")?;
    let action: String = column(row, "action")?;
    let description: Option<String> = column(row, "description")?;
    let created_at_s: String = column(row, "created_at")?;
    let updated_at_s: String = column(row, "updated_at")?;

    Ok(Permission {
        id: parse_uuid(&id_s)?,
        name,
        resource,
        action,
        description,
        created_at: parse_datetime(&created_at_s)?,
        updated_at: parse_datetime(&updated_at_s)?,
    })
}

pub fn role_from_row(row: &SqliteRow) -> Result<Role, AppError> {
    let id_s: String = column(row, "id")?;
    let name: String = column(row, "name")?;
    let description: Option<String> = column(row, "description")?;
    let is_system: bool = column(row, "is_system")?;
    let created_at_s: String = column(row, "created_at")?;
    let updated_at_s: String = column(row, "updated_at")?;

    Ok(Role {
        id: parse_uuid(&id_s)?,
        name,
        description,
        is_system,
        created_at: parse_datetime(&created_at_s)?,
        updated_at: parse_datetime(&updated_at_s)?,
    })
}

pub fn user_from_row(row: &SqliteRow) -> Result<User, AppError> {
    let id_s: String = column(row, "id")?;
    let username: String = column(row, "username")?;
    let email: Option<String> = column(row, "email")?;
    let created_at_s: String = column(row, "created_at")?;
    let updated_at_s: String = column(row, "updated_at")?;

    Ok(User {
        id: parse_uuid(&id_s)?,
        username,
        email,
        created_at: parse_datetime(&created_at_s)?,
        updated_at: parse_datetime(&updated_at_s)?,
    })
}

pub fn audit_from_row(row: &SqliteRow) -> Result<PermissionAudit, AppError> {
    let id: i64 = column(row, "id")?;
    let user_id_s: Option<String> = column(row, "user_id")?;
    let username: String = column(row, "username")?;
    let permission: String = column(row, "permission")?;
    let resource: String = column(row, "resource")?;
    let resource_id: Option<String> = column(row, "resource_id")?;
    let action: String = column(row, "action")?;
    let granted: bool = column(row, "granted")?;
    let ip_address: Option<String> = column(row, "ip_address")?;
    let user_agent: Option<String> = column(row, "user_agent")?;
    let details: Option<String> = column(row, "details")?;
    let timestamp_s: String = column(row, "timestamp")?;

    let user_id = match user_id_s {
        Some(s) => Some(parse_uuid(&s)?),
        None => None,
    };

    Ok(PermissionAudit {
        id,
        user_id,
        username,
        permission,
        resource,
        resource_id,
        action,
        granted,
        ip_address,
        user_agent,
        details,
        timestamp: parse_datetime(&timestamp_s)?,
    })
}
