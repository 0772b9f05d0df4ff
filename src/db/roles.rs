//! Persistence for `roles` and the `role_hierarchy` edge table.
//!
//! No graph invariants are enforced here; cycle checks belong to the
//! administration service.

use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::db::row_parsers::role_from_row;
use crate::db::{partition, Partial};
use crate::errors::{AppError, AppResult};
use crate::models::rbac::Role;
use crate::utils::{db_timestamp, utc_now};

const COLUMNS: &str = "id, name, description, is_system, created_at, updated_at";

pub async fn insert(
    conn: &mut SqliteConnection,
    name: &str,
    description: Option<&str>,
    is_system: bool,
) -> AppResult<Role> {
    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO roles (id, name, description, is_system, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(name)
    .bind(description)
    .bind(is_system)
    .bind(db_timestamp(now))
    .bind(db_timestamp(now))
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::from_insert(e, format!("role {}", name)))?;

    Ok(Role {
        id,
        name: name.to_string(),
        description: description.map(str::to_string),
        is_system,
        created_at: now,
        updated_at: now,
    })
}

pub async fn find_by_id(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Option<Role>> {
    let row = sqlx::query(&format!("SELECT {} FROM roles WHERE id = ?", COLUMNS))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(role_from_row).transpose()
}

pub async fn get_by_id(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Role> {
    find_by_id(conn, id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("role {}", id)))
}

pub async fn find_by_name(conn: &mut SqliteConnection, name: &str) -> AppResult<Option<Role>> {
    let row = sqlx::query(&format!("SELECT {} FROM roles WHERE name = ?", COLUMNS))
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(role_from_row).transpose()
}

pub async fn get_by_name(conn: &mut SqliteConnection, name: &str) -> AppResult<Role> {
    find_by_name(conn, name)
        .await?
        .ok_or_else(|| AppError::not_found(format!("role {}", name)))
}

pub async fn exists_by_name(conn: &mut SqliteConnection, name: &str) -> AppResult<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roles WHERE name = ?")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count > 0)
}

pub async fn find_by_names(conn: &mut SqliteConnection, names: &[String]) -> AppResult<Partial<Role>> {
    if names.is_empty() {
        return Ok(Partial { found: Vec::new(), missing: Vec::new() });
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT {} FROM roles WHERE name IN (", COLUMNS));
    let mut separated = qb.separated(", ");
    for name in names {
        separated.push_bind(name.as_str());
    }
    separated.push_unseparated(") ORDER BY name");

    let rows = qb.build().fetch_all(&mut *conn).await?;
    let found = rows.iter().map(role_from_row).collect::<AppResult<Vec<_>>>()?;

    Ok(partition(names, found, |r| r.name.as_str()))
}

pub async fn list(conn: &mut SqliteConnection) -> AppResult<Vec<Role>> {
    let rows = sqlx::query(&format!("SELECT {} FROM roles ORDER BY name", COLUMNS))
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(role_from_row).collect()
}

pub async fn list_by_system_flag(conn: &mut SqliteConnection, is_system: bool) -> AppResult<Vec<Role>> {
    let rows = sqlx::query(&format!("SELECT {} FROM roles WHERE is_system = ? ORDER BY name", COLUMNS))
        .bind(is_system)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(role_from_row).collect()
}

pub async fn update_description(conn: &mut SqliteConnection, id: Uuid, description: Option<&str>) -> AppResult<Role> {
    let result = sqlx::query("UPDATE roles SET description = ?, updated_at = ? WHERE id = ?")
        .bind(description)
        .bind(db_timestamp(utc_now()))
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("role {}", id)));
    }

    get_by_id(conn, id).await
}

/// Deletes a role and every row that references it: its permission
/// assignments, inheritance edges in both directions, and user assignments.
pub async fn delete(conn: &mut SqliteConnection, id: Uuid) -> AppResult<()> {
    let id_s = id.to_string();

    sqlx::query("DELETE FROM role_permissions WHERE role_id = ?")
        .bind(&id_s)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM role_hierarchy WHERE parent_role_id = ? OR child_role_id = ?")
        .bind(&id_s)
        .bind(&id_s)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM user_roles WHERE role_id = ?")
        .bind(&id_s)
        .execute(&mut *conn)
        .await?;

    let result = sqlx::query("DELETE FROM roles WHERE id = ?")
        .bind(&id_s)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("role {}", id)));
    }
    Ok(())
}

/// Returns `false` when the assignment already existed.
pub async fn add_permission(conn: &mut SqliteConnection, role_id: Uuid, permission_id: Uuid) -> AppResult<bool> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO role_permissions (role_id, permission_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(role_id.to_string())
    .bind(permission_id.to_string())
    .bind(db_timestamp(utc_now()))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn remove_permission(conn: &mut SqliteConnection, role_id: Uuid, permission_id: Uuid) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM role_permissions WHERE role_id = ? AND permission_id = ?")
        .bind(role_id.to_string())
        .bind(permission_id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Writes the edge `parent -> child` unconditionally. Returns `false` when it
/// already existed.
pub async fn add_child(conn: &mut SqliteConnection, parent_id: Uuid, child_id: Uuid) -> AppResult<bool> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO role_hierarchy (parent_role_id, child_role_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(parent_id.to_string())
    .bind(child_id.to_string())
    .bind(db_timestamp(utc_now()))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn remove_child(conn: &mut SqliteConnection, parent_id: Uuid, child_id: Uuid) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM role_hierarchy WHERE parent_role_id = ? AND child_role_id = ?")
        .bind(parent_id.to_string())
        .bind(child_id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Ids of the roles `role_id` directly inherits from.
pub async fn child_ids(conn: &mut SqliteConnection, role_id: Uuid) -> AppResult<Vec<Uuid>> {
    let rows = sqlx::query("SELECT child_role_id FROM role_hierarchy WHERE parent_role_id = ?")
        .bind(role_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    rows.iter()
        .map(|r| {
            let s: String = r.try_get("child_role_id").map_err(|e| AppError::internal(format!("missing child_role_id: {}", e)))?;
            Uuid::parse_str(&s).map_err(|e| AppError::internal(format!("invalid uuid: {}", e)))
        })
        .collect()
}

pub async fn child_roles(conn: &mut SqliteConnection, role_id: Uuid) -> AppResult<Vec<Role>> {
    let rows = sqlx::query(
        r#"
        SELECT r.id, r.name, r.description, r.is_system, r.created_at, r.updated_at
        FROM roles r
        INNER JOIN role_hierarchy rh ON r.id = rh.child_role_id
        WHERE rh.parent_role_id = ?
        ORDER BY r.name
        "#,
    )
    .bind(role_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(role_from_row).collect()
}
