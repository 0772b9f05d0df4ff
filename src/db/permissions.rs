//! Persistence for `permissions` and the `role_permissions` join table.

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::db::row_parsers::permission_from_row;
use crate::db::{partition, Partial};
use crate::errors::{AppError, AppResult};
use crate::models::rbac::{Permission, PermissionCreateRequest};
use crate::utils::{db_timestamp, utc_now};

const COLUMNS: &str = "id, name, resource, action, description, created_at, updated_at";

pub async fn insert(conn: &mut SqliteConnection, req: &PermissionCreateRequest) -> AppResult<Permission> {
    let id = Uuid::new_v4();
    let now = utc_now();
    let name = req.resolved_name();

    sqlx::query(
        "INSERT INTO permissions (id, name, resource, action, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&name)
    .bind(&req.resource)
    .bind(&req.action)
    .bind(&req.description)
    .bind(db_timestamp(now))
    .bind(db_timestamp(now))
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::from_insert(e, format!("permission {}", name)))?;

    Ok(Permission {
        id,
        name,
        resource: req.resource.clone(),
        action: req.action.clone(),
        description: req.description.clone(),
        created_at: now,
        updated_at: now,
    })
}

pub async fn find_by_id(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Option<Permission>> {
    let row = sqlx::query(&format!("SELECT {} FROM permissions WHERE id = ?", COLUMNS))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(permission_from_row).transpose()
}

pub async fn get_by_id(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Permission> {
    find_by_id(conn, id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("permission {}", id)))
}

pub async fn find_by_name(conn: &mut SqliteConnection, name: &str) -> AppResult<Option<Permission>> {
    let row = sqlx::query(&format!("SELECT {} FROM permissions WHERE name = ?", COLUMNS))
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(permission_from_row).transpose()
}

pub async fn find_by_names(conn: &mut SqliteConnection, names: &[String]) -> AppResult<Partial<Permission>> {
    if names.is_empty() {
        return Ok(Partial { found: Vec::new(), missing: Vec::new() });
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT {} FROM permissions WHERE name IN (", COLUMNS));
    let mut separated = qb.separated(", ");
    for name in names {
        separated.push_bind(name.as_str());
    }
    separated.push_unseparated(") ORDER BY name");

    let rows = qb.build().fetch_all(&mut *conn).await?;
    let found = rows.iter().map(permission_from_row).collect::<AppResult<Vec<_>>>()?;

    Ok(partition(names, found, |p| p.name.as_str()))
}

pub async fn list(conn: &mut SqliteConnection) -> AppResult<Vec<Permission>> {
    let rows = sqlx::query(&format!("SELECT {} FROM permissions ORDER BY name", COLUMNS))
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(permission_from_row).collect()
}

pub async fn update_description(conn: &mut SqliteConnection, id: Uuid, description: Option<&str>) -> AppResult<Permission> {
    let result = sqlx::query("UPDATE permissions SET description = ?, updated_at = ? WHERE id = ?")
        .bind(description)
        .bind(db_timestamp(utc_now()))
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("permission {}", id)));
    }

    get_by_id(conn, id).await
}

/// Deletes the permission row only. Callers must check
/// [`count_role_assignments`] first; the join table references this row.
pub async fn delete(conn: &mut SqliteConnection, id: Uuid) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM permissions WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("permission {}", id)));
    }
    Ok(())
}

pub async fn count_role_assignments(conn: &mut SqliteConnection, id: Uuid) -> AppResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM role_permissions WHERE permission_id = ?")
        .bind(id.to_string())
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

/// Direct permissions of one role (no inheritance).
pub async fn list_for_role(conn: &mut SqliteConnection, role_id: Uuid) -> AppResult<Vec<Permission>> {
    let rows = sqlx::query(
        r#"
        SELECT p.id, p.name, p.resource, p.action, p.description, p.created_at, p.updated_at
        FROM permissions p
        INNER JOIN role_permissions rp ON p.id = rp.permission_id
        WHERE rp.role_id = ?
        ORDER BY p.name
        "#,
    )
    .bind(role_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(permission_from_row).collect()
}
