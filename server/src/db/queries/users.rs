use sqlx::SqlitePool;

use crate::db::models::UserRow;

/// Profile fields mirrored from the identity provider.
pub struct UpsertUser<'a> {
    pub id: &'a str,
    pub username: Option<&'a str>,
    pub full_name: Option<&'a str>,
    pub email: Option<&'a str>,
    pub avatar_url: Option<&'a str>,
}

/// Insert a user or overwrite the profile of an existing one.
pub async fn upsert_user(pool: &SqlitePool, user: &UpsertUser<'_>) -> Result<UserRow, sqlx::Error> {
    sqlx::query_as::<_, UserRow>(
        "INSERT INTO users (id, username, full_name, email, avatar_url) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET \
            username = excluded.username, \
            full_name = excluded.full_name, \
            email = excluded.email, \
            avatar_url = excluded.avatar_url, \
            updated_at = datetime('now') \
         RETURNING *",
    )
    .bind(user.id)
    .bind(user.username)
    .bind(user.full_name)
    .bind(user.email)
    .bind(user.avatar_url)
    .fetch_one(pool)
    .await
}

pub async fn get_user(pool: &SqlitePool, user_id: &str) -> Result<Option<UserRow>, sqlx::Error> {
    sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::{create_pool, run_migrations};

    #[tokio::test]
    async fn test_upsert_inserts_then_updates() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        let first = upsert_user(
            &pool,
            &UpsertUser {
                id: "user_1",
                username: None,
                full_name: Some("Ana Banana"),
                email: Some("ana@example.com"),
                avatar_url: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(first.full_name.as_deref(), Some("Ana Banana"));

        upsert_user(
            &pool,
            &UpsertUser {
                id: "user_1",
                username: Some("ana"),
                full_name: Some("Ana B"),
                email: Some("ana@example.com"),
                avatar_url: Some("https://img.example/ana.png"),
            },
        )
        .await
        .unwrap();

        let stored = get_user(&pool, "user_1").await.unwrap().unwrap();
        assert_eq!(stored.username.as_deref(), Some("ana"));
        assert_eq!(stored.full_name.as_deref(), Some("Ana B"));
        assert_eq!(stored.created_at, first.created_at);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
