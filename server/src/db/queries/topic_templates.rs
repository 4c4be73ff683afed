use sqlx::SqlitePool;

use crate::db::models::TopicTemplateRow;

pub async fn create_template(
    pool: &SqlitePool,
    id: &str,
    owner_id: &str,
    owner_username: &str,
    title: &str,
    topics_json: &str,
) -> Result<TopicTemplateRow, sqlx::Error> {
    sqlx::query_as::<_, TopicTemplateRow>(
        "INSERT INTO topic_templates (id, owner_id, owner_username, title, topics) \
         VALUES (?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(id)
    .bind(owner_id)
    .bind(owner_username)
    .bind(title)
    .bind(topics_json)
    .fetch_one(pool)
    .await
}

pub async fn get_template(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<TopicTemplateRow>, sqlx::Error> {
    sqlx::query_as::<_, TopicTemplateRow>("SELECT * FROM topic_templates WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Templates owned by a user, newest first.
pub async fn list_templates_by_owner(
    pool: &SqlitePool,
    owner_id: &str,
) -> Result<Vec<TopicTemplateRow>, sqlx::Error> {
    sqlx::query_as::<_, TopicTemplateRow>(
        "SELECT * FROM topic_templates WHERE owner_id = ? ORDER BY created_at DESC, rowid DESC",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::TopicTemplate;
    use crate::db::pool::{create_pool, run_migrations};

    async fn pool() -> SqlitePool {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_create_and_get_keeps_topic_order() {
        let pool = pool().await;
        let topics = r#"[{"id":"a","title":"Openings","minutes":5},{"id":"b","title":"Rebuttals","minutes":3}]"#;
        create_template(&pool, "t1", "u1", "ana", "Standard", topics)
            .await
            .unwrap();

        let row = get_template(&pool, "t1").await.unwrap().unwrap();
        let template = TopicTemplate::try_from(row).unwrap();
        let titles: Vec<_> = template.topics.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, ["Openings", "Rebuttals"]);
        assert!(get_template(&pool, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_owner() {
        let pool = pool().await;
        create_template(&pool, "t1", "u1", "ana", "One", "[]").await.unwrap();
        create_template(&pool, "t2", "u1", "ana", "Two", "[]").await.unwrap();
        create_template(&pool, "t3", "u2", "bob", "Other", "[]").await.unwrap();

        let mine = list_templates_by_owner(&pool, "u1").await.unwrap();
        let ids: Vec<_> = mine.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["t2", "t1"]);
    }
}
