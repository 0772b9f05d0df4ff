//! Persistence for `users` and the `user_roles` join table.

use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::db::row_parsers::{role_from_row, user_from_row};
use crate::errors::{AppError, AppResult};
use crate::models::rbac::Role;
use crate::models::user::User;
use crate::utils::{db_timestamp, utc_now};

const COLUMNS: &str = "id, username, email, created_at, updated_at";

pub async fn insert(conn: &mut SqliteConnection, username: &str, email: Option<&str>) -> AppResult<User> {
    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query("INSERT INTO users (id, username, email, created_at, updated_at) VALUES (?, ?, ?, ?, ?)")
        .bind(id.to_string())
        .bind(username)
        .bind(email)
        .bind(db_timestamp(now))
        .bind(db_timestamp(now))
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::from_insert(e, format!("user {}", username)))?;

    Ok(User {
        id,
        username: username.to_string(),
        email: email.map(str::to_string),
        created_at: now,
        updated_at: now,
    })
}

pub async fn find_by_username(conn: &mut SqliteConnection, username: &str) -> AppResult<Option<User>> {
    let row = sqlx::query(&format!("SELECT {} FROM users WHERE username = ?", COLUMNS))
        .bind(username)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(user_from_row).transpose()
}

pub async fn get_by_username(conn: &mut SqliteConnection, username: &str) -> AppResult<User> {
    find_by_username(conn, username)
        .await?
        .ok_or_else(|| AppError::user_not_found(username))
}

pub async fn exists_by_username(conn: &mut SqliteConnection, username: &str) -> AppResult<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ?")
        .bind(username)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count > 0)
}

pub async fn list(conn: &mut SqliteConnection) -> AppResult<Vec<User>> {
    let rows = sqlx::query(&format!("SELECT {} FROM users ORDER BY username", COLUMNS))
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(user_from_row).collect()
}

/// Returns `false` when the user already held the role.
pub async fn add_role(conn: &mut SqliteConnection, user_id: Uuid, role_id: Uuid) -> AppResult<bool> {
    let result = sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_id, created_at) VALUES (?, ?, ?)")
        .bind(user_id.to_string())
        .bind(role_id.to_string())
        .bind(db_timestamp(utc_now()))
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn remove_role(conn: &mut SqliteConnection, user_id: Uuid, role_id: Uuid) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM user_roles WHERE user_id = ? AND role_id = ?")
        .bind(user_id.to_string())
        .bind(role_id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn roles_of(conn: &mut SqliteConnection, user_id: Uuid) -> AppResult<Vec<Role>> {
    let rows = sqlx::query(
        r#"
        SELECT r.id, r.name, r.description, r.is_system, r.created_at, r.updated_at
        FROM roles r
        INNER JOIN user_roles ur ON r.id = ur.role_id
        WHERE ur.user_id = ?
        ORDER BY r.name
        "#,
    )
    .bind(user_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(role_from_row).collect()
}
