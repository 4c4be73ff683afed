use sqlx::{Executor, Sqlite, SqlitePool};

use crate::db::models::{RoomRow, RoomStatus};

/// Maximum rooms returned by the public listing.
pub const PUBLIC_ROOM_LIMIT: i64 = 6;

pub struct NewRoom<'a> {
    pub id: &'a str,
    pub owner_id: &'a str,
    pub owner_username: &'a str,
    pub title: &'a str,
    pub slug: &'a str,
    pub template: Option<&'a str>,
    pub channel_name: &'a str,
    pub is_public: bool,
    pub header_image_url: Option<&'a str>,
}

/// Insert a room. Fails with a unique violation if owner username + slug is taken.
pub async fn create_room(pool: &SqlitePool, room: &NewRoom<'_>) -> Result<RoomRow, sqlx::Error> {
    sqlx::query_as::<_, RoomRow>(
        "INSERT INTO rooms \
         (id, owner_id, owner_username, title, slug, template, channel_name, status, is_public, header_image_url) \
         VALUES (?, ?, ?, ?, ?, ?, ?, 'active', ?, ?) \
         RETURNING *",
    )
    .bind(room.id)
    .bind(room.owner_id)
    .bind(room.owner_username)
    .bind(room.title)
    .bind(room.slug)
    .bind(room.template)
    .bind(room.channel_name)
    .bind(room.is_public)
    .bind(room.header_image_url)
    .fetch_one(pool)
    .await
}

pub async fn get_room_by_slug(
    pool: &SqlitePool,
    owner_username: &str,
    slug: &str,
) -> Result<Option<RoomRow>, sqlx::Error> {
    sqlx::query_as::<_, RoomRow>("SELECT * FROM rooms WHERE owner_username = ? AND slug = ? LIMIT 1")
        .bind(owner_username)
        .bind(slug)
        .fetch_optional(pool)
        .await
}

/// Rooms owned by a user, newest first.
pub async fn list_rooms_by_owner(
    pool: &SqlitePool,
    owner_id: &str,
) -> Result<Vec<RoomRow>, sqlx::Error> {
    sqlx::query_as::<_, RoomRow>(
        "SELECT * FROM rooms WHERE owner_id = ? ORDER BY created_at DESC, rowid DESC",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await
}

/// Newest public rooms that are still running.
pub async fn list_public_rooms(pool: &SqlitePool) -> Result<Vec<RoomRow>, sqlx::Error> {
    sqlx::query_as::<_, RoomRow>(
        "SELECT * FROM rooms WHERE is_public = 1 AND status = 'active' \
         ORDER BY created_at DESC, rowid DESC LIMIT ?",
    )
    .bind(PUBLIC_ROOM_LIMIT)
    .fetch_all(pool)
    .await
}

/// Set a room's status. `ended_at` is stamped when ending and cleared when reopening.
/// Returns `None` unless the room exists and belongs to `owner_id`.
pub async fn update_room_status<'e, E>(
    executor: E,
    owner_id: &str,
    owner_username: &str,
    slug: &str,
    status: RoomStatus,
) -> Result<Option<RoomRow>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, RoomRow>(
        "UPDATE rooms SET status = ?, \
         ended_at = CASE WHEN ? = 'ended' THEN strftime('%Y-%m-%dT%H:%M:%fZ', 'now') ELSE NULL END \
         WHERE owner_id = ? AND owner_username = ? AND slug = ? \
         RETURNING *",
    )
    .bind(status.as_str())
    .bind(status.as_str())
    .bind(owner_id)
    .bind(owner_username)
    .bind(slug)
    .fetch_optional(executor)
    .await
}

pub async fn update_room_visibility<'e, E>(
    executor: E,
    owner_id: &str,
    owner_username: &str,
    slug: &str,
    is_public: bool,
) -> Result<Option<RoomRow>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, RoomRow>(
        "UPDATE rooms SET is_public = ? \
         WHERE owner_id = ? AND owner_username = ? AND slug = ? \
         RETURNING *",
    )
    .bind(is_public)
    .bind(owner_id)
    .bind(owner_username)
    .bind(slug)
    .fetch_optional(executor)
    .await
}

/// Delete a room owned by `owner_id`, returning what was removed.
pub async fn delete_room(
    pool: &SqlitePool,
    owner_id: &str,
    owner_username: &str,
    slug: &str,
) -> Result<Option<RoomRow>, sqlx::Error> {
    sqlx::query_as::<_, RoomRow>(
        "DELETE FROM rooms WHERE owner_id = ? AND owner_username = ? AND slug = ? RETURNING *",
    )
    .bind(owner_id)
    .bind(owner_username)
    .bind(slug)
    .fetch_optional(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::{create_pool, run_migrations};

    async fn pool() -> SqlitePool {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    fn new_room<'a>(id: &'a str, owner: &'a str, slug: &'a str, public: bool) -> NewRoom<'a> {
        NewRoom {
            id,
            owner_id: owner,
            owner_username: owner,
            title: "Debate",
            slug,
            template: None,
            channel_name: "ch",
            is_public: public,
            header_image_url: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_fetch() {
        let pool = pool().await;
        let created = create_room(&pool, &new_room("r1", "ana", "ai", false)).await.unwrap();
        assert_eq!(created.status, "active");
        assert!(!created.is_public);
        assert!(created.ended_at.is_none());

        let fetched = get_room_by_slug(&pool, "ana", "ai").await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert!(get_room_by_slug(&pool, "bob", "ai").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_owner_newest_first() {
        let pool = pool().await;
        create_room(&pool, &new_room("r1", "ana", "first", false)).await.unwrap();
        create_room(&pool, &new_room("r2", "ana", "second", false)).await.unwrap();
        create_room(&pool, &new_room("r3", "bob", "other", false)).await.unwrap();
        let rooms = list_rooms_by_owner(&pool, "ana").await.unwrap();
        let slugs: Vec<_> = rooms.iter().map(|r| r.slug.as_str()).collect();
        assert_eq!(slugs, ["second", "first"]);
    }

    #[tokio::test]
    async fn test_public_listing_is_capped_and_active_only() {
        let pool = pool().await;
        for i in 0..8 {
            let id = format!("r{i}");
            let slug = format!("s{i}");
            create_room(&pool, &new_room(&id, "ana", &slug, true)).await.unwrap();
        }
        create_room(&pool, &new_room("hidden", "ana", "hidden", false)).await.unwrap();
        update_room_status(&pool, "ana", "ana", "s7", RoomStatus::Ended)
            .await
            .unwrap();

        let rooms = list_public_rooms(&pool).await.unwrap();
        assert_eq!(rooms.len(), PUBLIC_ROOM_LIMIT as usize);
        assert!(rooms.iter().all(|r| r.is_public && !r.is_ended()));
        assert_eq!(rooms[0].slug, "s6");
    }

    #[tokio::test]
    async fn test_status_stamps_ended_at() {
        let pool = pool().await;
        create_room(&pool, &new_room("r1", "ana", "ai", false)).await.unwrap();
        let ended = update_room_status(&pool, "ana", "ana", "ai", RoomStatus::Ended)
            .await
            .unwrap()
            .unwrap();
        assert!(ended.is_ended());
        assert!(ended.ended_at.is_some());

        let reopened = update_room_status(&pool, "ana", "ana", "ai", RoomStatus::Active)
            .await
            .unwrap()
            .unwrap();
        assert!(reopened.ended_at.is_none());
    }

    #[tokio::test]
    async fn test_only_owner_can_modify() {
        let pool = pool().await;
        create_room(&pool, &new_room("r1", "ana", "ai", false)).await.unwrap();
        assert!(
            update_room_visibility(&pool, "mallory", "ana", "ai", true)
                .await
                .unwrap()
                .is_none()
        );
        assert!(delete_room(&pool, "mallory", "ana", "ai").await.unwrap().is_none());

        let deleted = delete_room(&pool, "ana", "ana", "ai").await.unwrap().unwrap();
        assert_eq!(deleted.id, "r1");
        assert!(get_room_by_slug(&pool, "ana", "ai").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rolled_back_update_leaves_room_unchanged() {
        let pool = pool().await;
        create_room(&pool, &new_room("r1", "ana", "ai", false)).await.unwrap();

        let mut tx = pool.begin().await.unwrap();
        let ended = update_room_status(&mut *tx, "ana", "ana", "ai", RoomStatus::Ended)
            .await
            .unwrap()
            .unwrap();
        assert!(ended.is_ended());
        let shown = update_room_visibility(&mut *tx, "ana", "ana", "ai", true)
            .await
            .unwrap()
            .unwrap();
        assert!(shown.is_public && shown.is_ended());
        tx.rollback().await.unwrap();

        let room = get_room_by_slug(&pool, "ana", "ai").await.unwrap().unwrap();
        assert!(!room.is_ended());
        assert!(!room.is_public);
    }
}
