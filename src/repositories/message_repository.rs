use super::{MessageRepository, RepoResult};
use crate::models::ContributionMessage;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Repository for the contributors' message log
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn append(
        &self,
        gift_id: Uuid,
        sender_id: Uuid,
        body: &str,
    ) -> RepoResult<ContributionMessage> {
        let message = sqlx::query_as::<_, ContributionMessage>(
            r#"
            INSERT INTO contribution_messages (gift_id, sender_id, body)
            VALUES ($1, $2, $3)
            RETURNING id, gift_id, sender_id, body, created_at
            "#,
        )
        .bind(gift_id)
        .bind(sender_id)
        .bind(body)
        .fetch_one(&self.pool)
        .await?;

        Ok(message)
    }

    async fn list_by_gift(&self, gift_id: Uuid) -> RepoResult<Vec<ContributionMessage>> {
        let messages = sqlx::query_as::<_, ContributionMessage>(
            r#"
            SELECT id, gift_id, sender_id, body, created_at
            FROM contribution_messages
            WHERE gift_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(gift_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }
}
