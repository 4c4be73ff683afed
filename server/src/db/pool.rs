use std::str::FromStr;
use std::time::Duration;

use sqlx::Connection;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::info;

/// Embedded schema migrations, applied in order.
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../../migrations/001_initial.sql"))];

/// Create a SQLite pool in WAL mode.
///
/// An in-memory database lives only as long as its connection, so those
/// pools are pinned to a single connection that never idles out.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
    let options = SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };
    let pool = pool_options.connect_with(options).await?;

    info!(%database_url, "database connected");
    Ok(pool)
}

/// Apply every migration newer than the recorded schema version.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (\
            version     INTEGER PRIMARY KEY, \
            applied_at  TEXT NOT NULL DEFAULT (datetime('now'))\
        )",
    )
    .execute(pool)
    .await?;

    let current: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
        .fetch_one(pool)
        .await?;

    let mut conn = pool.acquire().await?;
    for &(version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        info!(version, "applying migration");
        // Schema change and version bump commit together or not at all.
        let mut tx = conn.begin().await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    let latest = MIGRATIONS.last().map_or(0, |m| m.0);
    info!(version = latest, "database schema up to date");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqlitePool {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let pool = memory_pool().await;
        for table in ["users", "rooms", "topic_templates"] {
            let exists: bool = sqlx::query_scalar(
                "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert!(exists, "{table} missing");
        }
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = memory_pool().await;
        run_migrations(&pool).await.unwrap();
        let versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(versions, MIGRATIONS.len() as i64);
    }

    #[test]
    fn test_migration_versions_are_sequential() {
        for (i, (version, _)) in MIGRATIONS.iter().enumerate() {
            assert_eq!(*version, i as i64 + 1);
        }
    }

    #[tokio::test]
    async fn test_room_slug_unique_per_owner_username() {
        let pool = memory_pool().await;
        let insert = "INSERT INTO rooms (id, owner_id, owner_username, title, slug, channel_name) \
                      VALUES (?, 'u1', 'ana', 'T', 'debate', 'ana-debate')";
        sqlx::query(insert).bind("r1").execute(&pool).await.unwrap();
        assert!(sqlx::query(insert).bind("r2").execute(&pool).await.is_err());
    }
}
