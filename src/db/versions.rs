//! Change counters for the role graph and for each user's role set.
//!
//! Mutations bump a counter inside their own transaction. A cached permission
//! set is valid only while the counters it was resolved under are current.

use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::errors::AppResult;

/// Counters a resolved permission set was computed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStamp {
    pub graph: i64,
    pub user: i64,
}

/// Bumps the role graph counter. Issued as the first statement of a
/// structural mutation, it also claims SQLite's write lock for the rest of
/// the transaction.
pub async fn bump_graph(conn: &mut SqliteConnection) -> AppResult<()> {
    sqlx::query("UPDATE rbac_versions SET graph_version = graph_version + 1 WHERE id = 1")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn bump_user(conn: &mut SqliteConnection, user_id: Uuid) -> AppResult<()> {
    sqlx::query("UPDATE users SET roles_version = roles_version + 1 WHERE id = ?")
        .bind(user_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// `None` when `username` is unknown.
pub async fn stamp_for(conn: &mut SqliteConnection, username: &str) -> AppResult<Option<StoreStamp>> {
    let row: Option<(i64, i64)> = sqlx::query_as(
        "SELECT v.graph_version, u.roles_version FROM users u, rbac_versions v WHERE v.id = 1 AND u.username = ?",
    )
    .bind(username)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|(graph, user)| StoreStamp { graph, user }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::users;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn bumps_move_only_their_own_counter() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect");
        sqlx::migrate!().run(&pool).await.expect("migrate");
        let mut conn = pool.acquire().await.unwrap();

        let alice = users::insert(&mut conn, "alice", None).await.unwrap();
        users::insert(&mut conn, "bob", None).await.unwrap();
        let start = stamp_for(&mut conn, "alice").await.unwrap().unwrap();

        bump_user(&mut conn, alice.id).await.unwrap();
        let after_user = stamp_for(&mut conn, "alice").await.unwrap().unwrap();
        assert_eq!(after_user, StoreStamp { graph: start.graph, user: start.user + 1 });
        assert_eq!(stamp_for(&mut conn, "bob").await.unwrap().unwrap().user, start.user);

        bump_graph(&mut conn).await.unwrap();
        assert_eq!(stamp_for(&mut conn, "bob").await.unwrap().unwrap().graph, start.graph + 1);

        assert_eq!(stamp_for(&mut conn, "ghost").await.unwrap(), None);
    }
}
